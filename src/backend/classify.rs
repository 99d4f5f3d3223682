// Guess what a backend prompt is asking for.
//
// PAM gives us a line of text and whether to echo the answer, nothing
// more. These rules cover the usual login and password-change wording.
//
use regex::Regex;

use qauth::PromptType;

use super::converse::MessageStyle;

lazy_static! {
    static ref PASSWORD: Regex = Regex::new(r"(?i)\bpassword\b").unwrap();
    static ref REPEAT: Regex = Regex::new(r"(?i)\b(re-?type|re-?enter|again|confirm|repeat)").unwrap();
    static ref NEW: Regex = Regex::new(r"(?i)\bnew\b").unwrap();
    static ref CURRENT: Regex = Regex::new(r"(?i)\b(old|current)\b").unwrap();
    static ref CHANGE_NOTICE: Regex = Regex::new(
        r"(?i)(changing password for|password (has )?expired|must change your password|password change required)"
    )
    .unwrap();
}

/// Semantic type of a prompt.
///
/// Anything echoed is taken to be the user name.
pub fn classify(style: MessageStyle, text: &str) -> PromptType {
    match style {
        MessageStyle::PromptEchoOn => PromptType::LoginUser,
        MessageStyle::PromptEchoOff => {
            if !PASSWORD.is_match(text) {
                PromptType::Unknown
            } else if REPEAT.is_match(text) {
                PromptType::ChangeRepeat
            } else if NEW.is_match(text) {
                PromptType::ChangeNew
            } else if CURRENT.is_match(text) {
                PromptType::ChangeCurrent
            } else {
                PromptType::LoginPassword
            }
        },
        _ => PromptType::None,
    }
}

/// Does this informational text announce a password change?
pub fn announces_change(text: &str) -> bool {
    CHANGE_NOTICE.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let off = MessageStyle::PromptEchoOff;
        assert_eq!(classify(off, "New password: "), PromptType::ChangeNew);
        assert_eq!(classify(off, "Retype new password: "), PromptType::ChangeRepeat);
        assert_eq!(classify(off, "Re-enter new password: "), PromptType::ChangeRepeat);
        assert_eq!(classify(off, "(current) UNIX password: "), PromptType::ChangeCurrent);
        assert_eq!(classify(off, "Current password: "), PromptType::ChangeCurrent);
        assert_eq!(classify(off, "Password: "), PromptType::LoginPassword);
        assert_eq!(classify(off, "PIN: "), PromptType::Unknown);
        assert_eq!(classify(off, "Passwords: "), PromptType::Unknown);
        assert_eq!(classify(MessageStyle::PromptEchoOn, "login: "), PromptType::LoginUser);
        assert_eq!(classify(MessageStyle::PromptEchoOn, "Verification code: "), PromptType::LoginUser);
        assert_eq!(classify(MessageStyle::TextInfo, "Password: "), PromptType::None);
    }

    #[test]
    fn test_announces_change() {
        assert!(announces_change("Changing password for alice."));
        assert!(announces_change("You are required to change your password immediately (password expired)"));
        assert!(announces_change("Your password has expired"));
        assert!(!announces_change("Last login: Mon Oct 19 10:00:00"));
    }
}
