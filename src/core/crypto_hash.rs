use std::{
    fmt::Display,
    fs::File,
    io::{self, Read},
    path::Path,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(from = "String", into = "String")]
pub struct ShaSum(String);

impl ShaSum {
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<ShaSum> {
        let mut hasher = Sha256::new();
        let mut file = File::open(path)?;
        let mut buffer = [0u8; 8192];
        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(ShaSum::from_digest(hasher))
    }

    #[cfg(test)]
    pub fn from_bytes(data: impl AsRef<[u8]>) -> ShaSum {
        let mut hasher = Sha256::new();
        hasher.update(data.as_ref());
        ShaSum::from_digest(hasher)
    }

    fn from_digest(hasher: Sha256) -> ShaSum {
        let result = hasher.finalize();
        let shasum: String = result
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<String>>()
            .join("");
        ShaSum(shasum)
    }
}

impl AsRef<str> for ShaSum {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for ShaSum {
    fn from(value: String) -> Self {
        ShaSum(value)
    }
}

impl From<ShaSum> for String {
    fn from(value: ShaSum) -> Self {
        value.0
    }
}

impl Display for ShaSum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
