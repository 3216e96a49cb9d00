use crate::error::{DetectorError, Result};
use crate::services::credentials::{CredentialStore, Secret};

pub fn set_key(store: &dyn CredentialStore, key: &str) -> Result<()> {
    if !Secret::new(key).is_usable() {
        return Err(DetectorError::Auth {
            message: "Refusing to store an empty or placeholder API key".to_string(),
        });
    }
    store.set_credential(key)?;
    tracing::info!("API key saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::credentials::{MemoryCredentialStore, PLACEHOLDER_KEY};

    #[test]
    fn placeholder_is_not_saved() {
        let store = MemoryCredentialStore::new(None);
        assert!(set_key(&store, PLACEHOLDER_KEY).is_err());
        assert_eq!(store.get_credential().unwrap(), None);

        set_key(&store, "sk-real").unwrap();
        assert!(store.get_credential().unwrap().unwrap().is_usable());
    }
}
