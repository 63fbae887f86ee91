//! Designated accounts whose transfers move reported supply.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Address that pays block rewards.
pub const MAINNET_TREASURY: &str = "000000000000000000000000000000000000000000";

const MAINNET_RESERVE: [&str; 5] = [
    MAINNET_TREASURY,
    "pc1z2r0fmu8sg2ffa0tgrr08gnefcxl2kq7wvquf8z",
    "pc1zprhnvcsy3pthekdcu28cw8muw4f432hkwgfasv",
    "pc1znn2qxsugfrt7j4608zvtnxf8dnz8skrxguyf45",
    "pc1zs64vdggjcshumjwzaskhfn0j9gfpkvche3kxd3",
];

const MAINNET_TEAM_HOT: [&str; 2] = [
    "pc1zuavu4sjcxcx9zsl8rlwwx0amnl94sp0el3u37g",
    "pc1zf0gyc4kxlfsvu64pheqzmk8r9eyzxqvxlk6s6t",
];

/// Reserve, team hot-wallet and treasury addresses.
///
/// Coins leaving a reserve or team account count as newly issued supply;
/// coins flowing back in are withdrawn from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyAccounts {
    #[serde(default)]
    pub reserve: BTreeSet<String>,
    #[serde(default)]
    pub team_hot: BTreeSet<String>,
    #[serde(default = "default_treasury")]
    pub treasury: String,
}

fn default_treasury() -> String {
    MAINNET_TREASURY.to_string()
}

impl Default for SupplyAccounts {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl SupplyAccounts {
    /// Mainnet reserve and team hot-wallet accounts.
    pub fn mainnet() -> Self {
        Self {
            reserve: MAINNET_RESERVE.iter().map(|a| a.to_string()).collect(),
            team_hot: MAINNET_TEAM_HOT.iter().map(|a| a.to_string()).collect(),
            treasury: default_treasury(),
        }
    }

    /// No designated accounts besides the given treasury.
    pub fn none(treasury: impl Into<String>) -> Self {
        Self {
            reserve: BTreeSet::new(),
            team_hot: BTreeSet::new(),
            treasury: treasury.into(),
        }
    }

    pub fn is_reserve(&self, address: &str) -> bool {
        self.reserve.contains(address)
    }

    pub fn is_team_hot(&self, address: &str) -> bool {
        self.team_hot.contains(address)
    }

    pub fn is_treasury(&self, address: &str) -> bool {
        self.treasury == address
    }

    /// Signed supply change caused by moving `amount` from `sender` to `receiver`.
    ///
    /// Reserve and team rules stack: an account listed in both sets counts twice.
    pub fn supply_delta(&self, sender: &str, receiver: &str, amount: i64) -> i64 {
        let mut delta = 0;
        if self.is_reserve(sender) {
            delta += amount;
        }
        if self.is_reserve(receiver) {
            delta -= amount;
        }
        if self.is_team_hot(sender) {
            delta += amount;
        }
        if self.is_team_hot(receiver) {
            delta -= amount;
        }
        delta
    }
}
