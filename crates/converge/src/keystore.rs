//! Keystore seam: named keysets of certificates and private keys.
//!
//! Key material is opaque PEM text; generating or verifying it is the
//! keystore's business, not the engine's.

use crate::error::{Error, Result};
use crate::resource::Resource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// PEM-encoded certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub pem: String,
}

/// PEM-encoded private key. Debug output never shows the key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKey {
    pub pem: String,
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// One keypair of a keyset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysetItem {
    pub id: String,
    pub certificate: Certificate,
    pub private_key: Option<PrivateKey>,
}

/// Named bundle of keypairs with one primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyset {
    pub name: String,
    pub items: BTreeMap<String, KeysetItem>,
    pub primary: String,
}

impl Keyset {
    /// Keyset with a single item, which becomes the primary.
    pub fn single(name: impl Into<String>, item: KeysetItem) -> Self {
        let primary = item.id.clone();
        let mut items = BTreeMap::new();
        items.insert(item.id.clone(), item);
        Self {
            name: name.into(),
            items,
            primary,
        }
    }

    pub fn primary_item(&self) -> Option<&KeysetItem> {
        self.items.get(&self.primary)
    }
}

/// Read access to key material.
pub trait Keystore: Send + Sync {
    fn find_keyset(&self, name: &str) -> Result<Option<Keyset>>;

    /// Primary certificate of a keyset.
    fn find_cert(&self, name: &str) -> Result<Option<Certificate>> {
        Ok(self
            .find_keyset(name)?
            .and_then(|ks| ks.primary_item().map(|item| item.certificate.clone())))
    }

    /// Primary private key of a keyset.
    fn find_private_key(&self, name: &str) -> Result<Option<PrivateKey>> {
        Ok(self
            .find_keyset(name)?
            .and_then(|ks| ks.primary_item().and_then(|item| item.private_key.clone())))
    }
}

/// In-memory keystore.
#[derive(Debug, Default)]
pub struct MemoryKeystore {
    keysets: RwLock<BTreeMap<String, Keyset>>,
}

impl MemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, keyset: Keyset) {
        match self.keysets.write() {
            Ok(mut map) => map.insert(keyset.name.clone(), keyset),
            Err(poisoned) => poisoned.into_inner().insert(keyset.name.clone(), keyset),
        };
    }

    /// Load `<name>.crt` / `<name>.key` pairs from a directory. A key file
    /// without a matching certificate is ignored.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let store = Self::new();
        let entries = std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| Error::io(dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("crt") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let pem = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
            let key_path = path.with_extension("key");
            let private_key = if key_path.exists() {
                let pem =
                    std::fs::read_to_string(&key_path).map_err(|e| Error::io(&key_path, e))?;
                Some(PrivateKey { pem })
            } else {
                None
            };
            log::debug!("Loaded keyset {name} from {}", path.display());
            store.insert(Keyset::single(
                name,
                KeysetItem {
                    id: "1".to_string(),
                    certificate: Certificate { pem },
                    private_key,
                },
            ));
        }
        Ok(store)
    }
}

impl Keystore for MemoryKeystore {
    fn find_keyset(&self, name: &str) -> Result<Option<Keyset>> {
        Ok(match self.keysets.read() {
            Ok(map) => map.get(name).cloned(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned(),
        })
    }
}

impl<K: Keystore + ?Sized> Keystore for Arc<K> {
    fn find_keyset(&self, name: &str) -> Result<Option<Keyset>> {
        (**self).find_keyset(name)
    }
}

/// The primary certificate of a keyset, read from a keystore on access.
#[derive(Clone)]
pub struct CertificateResource {
    keystore: Arc<dyn Keystore>,
    name: String,
}

impl CertificateResource {
    pub fn new(keystore: Arc<dyn Keystore>, name: impl Into<String>) -> Self {
        Self {
            keystore,
            name: name.into(),
        }
    }
}

impl fmt::Debug for CertificateResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CertificateResource({})", self.name)
    }
}

impl Resource for CertificateResource {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        self.keystore
            .find_cert(&self.name)?
            .map(|c| c.pem.into_bytes())
            .ok_or_else(|| Error::NotFound {
                message: format!("certificate {}", self.name),
            })
    }
}

/// The primary private key of a keyset, read from a keystore on access.
#[derive(Clone)]
pub struct PrivateKeyResource {
    keystore: Arc<dyn Keystore>,
    name: String,
}

impl PrivateKeyResource {
    pub fn new(keystore: Arc<dyn Keystore>, name: impl Into<String>) -> Self {
        Self {
            keystore,
            name: name.into(),
        }
    }
}

impl fmt::Debug for PrivateKeyResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKeyResource({})", self.name)
    }
}

impl Resource for PrivateKeyResource {
    fn as_bytes(&self) -> Result<Vec<u8>> {
        self.keystore
            .find_private_key(&self.name)?
            .map(|k| k.pem.into_bytes())
            .ok_or_else(|| Error::NotFound {
                message: format!("private key {}", self.name),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn item(id: &str, cert: &str, key: Option<&str>) -> KeysetItem {
        KeysetItem {
            id: id.to_string(),
            certificate: Certificate {
                pem: cert.to_string(),
            },
            private_key: key.map(|k| PrivateKey { pem: k.to_string() }),
        }
    }

    #[test]
    fn test_primary_lookup() {
        let store = MemoryKeystore::new();
        let mut keyset = Keyset::single("ca", item("1", "OLD", Some("OLDKEY")));
        keyset.items.insert("2".to_string(), item("2", "NEW", Some("NEWKEY")));
        keyset.primary = "2".to_string();
        store.insert(keyset);

        assert_eq!(store.find_cert("ca").unwrap().unwrap().pem, "NEW");
        assert_eq!(store.find_private_key("ca").unwrap().unwrap().pem, "NEWKEY");
        assert!(store.find_cert("missing").unwrap().is_none());
    }

    #[test]
    fn test_private_key_debug_redacted() {
        let key = PrivateKey {
            pem: "SECRET".to_string(),
        };
        assert!(!format!("{key:?}").contains("SECRET"));
    }

    #[test]
    fn test_resources() {
        let store: Arc<dyn Keystore> = {
            let s = MemoryKeystore::new();
            s.insert(Keyset::single("ca", item("1", "CERT", None)));
            Arc::new(s)
        };

        let cert = CertificateResource::new(store.clone(), "ca");
        assert_eq!(cert.as_string().unwrap(), "CERT");

        let key = PrivateKeyResource::new(store, "ca");
        assert!(matches!(key.as_bytes(), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_load_dir() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("ca.crt"), "CACERT").unwrap();
        std::fs::write(temp.path().join("ca.key"), "CAKEY").unwrap();
        std::fs::write(temp.path().join("kubelet.crt"), "KUBELET").unwrap();
        std::fs::write(temp.path().join("orphan.key"), "X").unwrap();

        let store = MemoryKeystore::load_dir(temp.path()).unwrap();
        assert_eq!(store.find_cert("ca").unwrap().unwrap().pem, "CACERT");
        assert_eq!(store.find_private_key("ca").unwrap().unwrap().pem, "CAKEY");
        assert!(store.find_private_key("kubelet").unwrap().is_none());
        assert!(store.find_keyset("orphan").unwrap().is_none());
    }
}
