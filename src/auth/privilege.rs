use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Capability level attached to a role row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    Owner,
    Administrator,
    Member,
}

impl Privilege {
    pub fn as_str(self) -> &'static str {
        match self {
            Privilege::Owner => "owner",
            Privilege::Administrator => "administrator",
            Privilege::Member => "member",
        }
    }

    pub fn can_manage_users(self) -> bool {
        matches!(self, Privilege::Owner | Privilege::Administrator)
    }

    pub fn is_owner(self) -> bool {
        self == Privilege::Owner
    }
}

impl FromStr for Privilege {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "owner" => Ok(Privilege::Owner),
            "administrator" => Ok(Privilege::Administrator),
            "member" => Ok(Privilege::Member),
            other => Err(format!("unknown privilege {other}")),
        }
    }
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_owner_and_administrator_manage_users() {
        assert!(Privilege::Owner.can_manage_users());
        assert!(Privilege::Administrator.can_manage_users());
        assert!(!Privilege::Member.can_manage_users());
    }

    #[test]
    fn parses_stored_values() {
        for privilege in [
            Privilege::Owner,
            Privilege::Administrator,
            Privilege::Member,
        ] {
            assert_eq!(privilege.as_str().parse::<Privilege>(), Ok(privilege));
        }
        assert!("Owner".parse::<Privilege>().is_err());
    }
}
