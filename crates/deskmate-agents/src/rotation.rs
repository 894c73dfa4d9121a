use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use deskmate_common::{Error, Result};
use tracing::{info, warn};

/// An API key. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Last four characters, enough to tell keys apart in logs.
    pub fn fingerprint(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        format!("…{tail}")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.fingerprint())
    }
}

/// The (model, credential) pair the next model call should use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBinding {
    pub model: String,
    pub credential: Credential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationSnapshot {
    pub model_cursor: usize,
    pub credential_cursor: usize,
    pub failed_models: Vec<String>,
}

#[derive(Debug, Default)]
struct Cursor {
    model: usize,
    credential: usize,
    failed: HashSet<String>,
}

/// Process-wide failover state over ordered models and credentials.
///
/// Every public operation takes the lock once and releases it before returning, so the
/// state can be shared across concurrent turns through an `Arc`. Nothing coordinates
/// sequences of operations: two turns may both mark the same model failed.
#[derive(Debug)]
pub struct RotationState {
    models: Vec<String>,
    credentials: Vec<Credential>,
    cursor: Mutex<Cursor>,
}

impl RotationState {
    pub fn new(models: Vec<String>, credentials: Vec<Credential>) -> Result<Self> {
        if models.is_empty() {
            return Err(Error::Config("model rotation needs at least one model".into()));
        }
        if credentials.is_empty() {
            return Err(Error::Config(
                "no Gemini API keys configured (set GEMINI_API_KEY)".into(),
            ));
        }
        Ok(Self {
            models,
            credentials,
            cursor: Mutex::new(Cursor::default()),
        })
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn credential_count(&self) -> usize {
        self.credentials.len()
    }

    /// First non-failed model at or after the cursor. When every model has failed the
    /// failed set is cleared and the next credential is paired with the first model.
    pub fn get_active(&self) -> ActiveBinding {
        let mut cursor = self.lock();
        self.resolve(&mut cursor)
    }

    /// Record a failure for `model`, step past it and return the new active pair.
    pub fn mark_failed(&self, model: &str) -> ActiveBinding {
        let mut cursor = self.lock();
        cursor.failed.insert(model.to_string());
        cursor.model = (cursor.model + 1) % self.models.len();
        info!(
            "marked model {} as failed ({}/{})",
            model,
            cursor.failed.len(),
            self.models.len()
        );
        let active = self.resolve(&mut cursor);
        info!("rotated to model {}", active.model);
        active
    }

    pub fn snapshot(&self) -> RotationSnapshot {
        let cursor = self.lock();
        let mut failed_models: Vec<String> = cursor.failed.iter().cloned().collect();
        failed_models.sort();
        RotationSnapshot {
            model_cursor: cursor.model,
            credential_cursor: cursor.credential,
            failed_models,
        }
    }

    fn resolve(&self, cursor: &mut Cursor) -> ActiveBinding {
        let count = self.models.len();
        for offset in 0..count {
            let idx = (cursor.model + offset) % count;
            if !cursor.failed.contains(&self.models[idx]) {
                cursor.model = idx;
                return self.binding(cursor);
            }
        }

        cursor.failed.clear();
        cursor.credential = (cursor.credential + 1) % self.credentials.len();
        if cursor.credential == 0 {
            warn!("all models and API keys exhausted, starting over from the first key");
        } else {
            info!(
                "all models failed, switching to API key {}",
                self.credentials[cursor.credential].fingerprint()
            );
        }
        cursor.model = 0;
        self.binding(cursor)
    }

    fn binding(&self, cursor: &Cursor) -> ActiveBinding {
        ActiveBinding {
            model: self.models[cursor.model].clone(),
            credential: self.credentials[cursor.credential].clone(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
