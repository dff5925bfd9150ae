use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// An access token
///
/// A short-lived bearer credential, generally a JWT.
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// A refresh token
///
/// Used solely to mint a new token pair.
#[braid(serde, debug = "owned", display = "owned")]
pub struct RefreshToken;

limited_reveal!(RefreshTokenRef: "REFRESH TOKEN", 5);

/// A password, either current or newly chosen
#[braid(serde, debug = "owned", display = "owned")]
pub struct Password;

limited_reveal!(PasswordRef: "PASSWORD", 0);

/// A single-use password reset token delivered out of band
#[braid(serde, debug = "owned", display = "owned")]
pub struct ResetToken;

limited_reveal!(ResetTokenRef: "RESET TOKEN", 5);

/// The identifier of a user, as carried in the `sub` claim
#[braid(serde)]
pub struct UserId;

/// An email address
#[braid(serde)]
pub struct Email;

/// The name of a role granted to a user
#[braid(serde)]
pub struct Role;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_hidden_by_default() {
        let token = AccessToken::from_static("eyJhbGciOiJIUzI1NiJ9.payload.signature");
        assert_eq!(format!("{:?}", token), "***ACCESS TOKEN***");
        assert_eq!(format!("{}", token), "***ACCESS TOKEN***");

        let password = Password::from_static("hunter2");
        assert_eq!(format!("{:?}", password), "***PASSWORD***");
    }

    #[test]
    fn alternate_debug_reveals_a_prefix() {
        let token = RefreshToken::from_static("abcdefghijkl");
        assert_eq!(format!("{:#?}", token), "\"abcd…\"");
        assert_eq!(format!("{:#}", token), "abcdefghijkl");
        assert_eq!(format!("{:#8?}", token), "\"abcdefg…\"");
    }

    #[test]
    fn short_secrets_are_revealed_whole_in_alternate_mode() {
        let token = ResetToken::from_static("abc");
        assert_eq!(format!("{:#?}", token), "\"abc\"");
    }

    #[test]
    fn identity_values_are_plain() {
        let role = Role::from_static("admin");
        assert_eq!(format!("{}", role), "admin");
        assert_eq!(role.as_str(), "admin");
    }
}
