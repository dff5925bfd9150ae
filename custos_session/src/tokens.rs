use custos_clock::{DurationSecs, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{
    error::MalformedTokenError, token_clock, AccessClaims, AccessToken, AccessTokenRef, Email,
    RefreshToken, RefreshTokenRef, Roles, UserId,
};

/// An access token together with the refresh token that can renew it
///
/// The expiry is decoded from the access token when the pair is constructed. A
/// pair is only ever replaced as a whole.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenPair {
    access_token: AccessToken,
    refresh_token: RefreshToken,
    expires_at: Option<UnixTime>,
}

impl TokenPair {
    /// Pairs an access token with its refresh token
    ///
    /// An access token whose expiry cannot be decoded is still accepted; it
    /// simply reports that it needs refreshing.
    pub fn new(access_token: AccessToken, refresh_token: RefreshToken) -> Self {
        let expires_at = match token_clock::decode_expiry(&access_token) {
            Ok(exp) => Some(exp),
            Err(error) => {
                tracing::debug!(
                    error = (&error as &dyn std::error::Error),
                    "access token expiry unreadable, treating as due for refresh"
                );
                None
            }
        };

        Self {
            access_token,
            refresh_token,
            expires_at,
        }
    }

    /// Gets the current access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the refresh token
    #[inline]
    pub fn refresh_token(&self) -> &RefreshTokenRef {
        &self.refresh_token
    }

    /// Gets the decoded expiry of the access token, if it could be read
    #[inline]
    pub fn expires_at(&self) -> Option<UnixTime> {
        self.expires_at
    }

    /// Whether the access token has expired as of `now`
    #[inline]
    pub fn is_expired_at(&self, now: UnixTime) -> bool {
        self.expires_at.map_or(true, |exp| now >= exp)
    }

    /// Whether the access token is within `lookahead` of expiring as of `now`
    #[inline]
    pub fn needs_refresh_at(&self, now: UnixTime, lookahead: DurationSecs) -> bool {
        self.expires_at.map_or(true, |exp| now >= exp - lookahead)
    }

    /// Time left before the access token expires, zero if already expired
    #[inline]
    pub fn until_expired_at(&self, now: UnixTime) -> DurationSecs {
        self.expires_at.map_or(DurationSecs::ZERO, |exp| exp - now)
    }

    pub(crate) fn to_record(&self) -> TokenRecord {
        TokenRecord {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

/// The serialized shape of a token pair
///
/// This is both what the authority returns and what is written to durable
/// storage. The expiry is never stored; it is decoded again on load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// The access token
    pub access_token: AccessToken,
    /// The refresh token
    pub refresh_token: RefreshToken,
}

impl From<TokenRecord> for TokenPair {
    fn from(record: TokenRecord) -> Self {
        TokenPair::new(record.access_token, record.refresh_token)
    }
}

/// The authenticated user, as described by the access token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    id: UserId,
    email: Option<Email>,
    roles: Roles,
}

impl UserIdentity {
    /// Constructs an identity directly
    pub fn new(id: UserId, email: Option<Email>, roles: Roles) -> Self {
        Self { id, email, roles }
    }

    /// Extracts the identity from an access token's claims
    ///
    /// The `sub` claim is required.
    pub fn from_access_token(token: &AccessTokenRef) -> Result<Self, MalformedTokenError> {
        Self::try_from(token_clock::decode_claims(token)?)
    }

    /// The user's identifier
    #[inline]
    pub fn id(&self) -> &UserId {
        &self.id
    }

    /// The user's email address, if the token carried one
    #[inline]
    pub fn email(&self) -> Option<&Email> {
        self.email.as_ref()
    }

    /// The roles granted to the user
    #[inline]
    pub fn roles(&self) -> &Roles {
        &self.roles
    }
}

impl TryFrom<AccessClaims> for UserIdentity {
    type Error = MalformedTokenError;

    fn try_from(claims: AccessClaims) -> Result<Self, Self::Error> {
        let id = claims.sub.ok_or_else(crate::error::malformed_token)?;
        Ok(Self {
            id,
            email: claims.email,
            roles: claims.roles,
        })
    }
}
