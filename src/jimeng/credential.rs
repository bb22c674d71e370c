use std::fmt;

/// Session token used verbatim as both access and refresh token.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential(String);

impl SessionCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split an `Authorization`-style value (`Bearer a, b`) into credentials.
    pub fn split(auth: &str) -> Vec<SessionCredential> {
        auth.replace("Bearer", "")
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(SessionCredential::new)
            .collect()
    }

    /// Cookie header carrying the session under every name the web app reads.
    pub fn cookie(&self) -> String {
        let token = &self.0;
        format!(
            "sessionid={token}; sessionid_ss={token}; sid_tt={token}; uid_tt={token}; uid_tt_ss={token}"
        )
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionCredential(<redacted>)")
    }
}
