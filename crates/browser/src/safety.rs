//! Destructive-action deny-list.
//!
//! The probe runs against live applications; actions that could log the
//! account out or destroy state are never executed, no matter what the
//! model decided.

const DENY_LIST: &[&str] = &[
    "logout",
    "log out",
    "sign out",
    "signout",
    "delete",
    "remove account",
    "deactivate",
    "unsubscribe",
    "drop table",
];

/// Case-insensitive substring check against the deny-list. Applied to every
/// selector, fill value, and raw JS before a mutating operation runs.
pub fn deny_listed(text: &str) -> Option<&'static str> {
    let lowered = text.to_lowercase();
    DENY_LIST.iter().find(|term| lowered.contains(**term)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_are_case_insensitive() {
        assert_eq!(deny_listed("button:has-text('Sign Out')"), Some("sign out"));
        assert_eq!(deny_listed("#DELETE-project"), Some("delete"));
        assert_eq!(deny_listed("document.querySelector('.logout').click()"), Some("logout"));
    }

    #[test]
    fn benign_targets_pass() {
        assert!(deny_listed("#submit-button").is_none());
        assert!(deny_listed("input[name=email]").is_none());
        assert!(deny_listed("Save changes").is_none());
    }
}
