use std::fmt;

use zeroize::Zeroizing;

/// Password for encrypted zip entries.
///
/// Handed by value to the call that opens an entry and wiped when that call
/// returns. `Debug` never prints the secret.
pub struct Credential {
    inner: Zeroizing<Vec<u8>>,
}

impl Credential {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: Zeroizing::new(secret.into()),
        }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.inner
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("len", &self.inner.len())
            .finish()
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}
