//! Credential store: username -> (salt, scrypt hash, profile id).
//!
//! Hashing runs on the blocking pool so a burst of sign-ups never stalls the
//! connection tasks. Unknown usernames and wrong passwords fail with the same
//! error after the same amount of hashing work.

use crate::error::{AuthError, StorageError};
use crate::persistence::read_table;
use crate::profiles::{profile_id_for, sanitize_profile_id};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 64;
const PASSWORD_MIN: usize = 4;
const PASSWORD_MAX: usize = 80;
/// Salt hashed against when the username is unknown, to even out timing
const DUMMY_SALT: &str = "00000000000000000000000000000000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    /// Hex text; the hash is computed over these ASCII bytes
    pub salt: String,
    pub hash: String,
    pub profile_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountRecord {
    salt: String,
    hash: String,
    profile_id: String,
}

/// Successful register or login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub username: String,
    pub profile_id: String,
}

pub struct CredentialStore {
    accounts: RwLock<HashMap<String, Account>>,
    params: scrypt::Params,
}

/// Lowercased username if it matches `^[a-z0-9_]{3,20}$`.
pub fn sanitize_username(value: Option<&str>) -> Option<String> {
    let raw = value?.trim().to_lowercase();
    let valid = (3..=20).contains(&raw.len())
        && raw
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    valid.then_some(raw)
}

fn check_password(value: Option<&str>) -> Result<&str, AuthError> {
    let password = value.unwrap_or("");
    let len = password.chars().count();
    if len < PASSWORD_MIN {
        Err(AuthError::PasswordTooShort)
    } else if len > PASSWORD_MAX {
        Err(AuthError::PasswordTooLong)
    } else {
        Ok(password)
    }
}

fn random_salt() -> String {
    let mut bytes = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// scrypt on the blocking pool.
async fn derive(
    params: scrypt::Params,
    password: String,
    salt: String,
) -> Result<Vec<u8>, AuthError> {
    tokio::task::spawn_blocking(move || {
        let mut out = vec![0u8; HASH_LEN];
        scrypt::scrypt(password.as_bytes(), salt.as_bytes(), &params, &mut out)
            .map_err(|_| AuthError::Internal)?;
        Ok(out)
    })
    .await
    .map_err(|_| AuthError::Internal)?
}

impl CredentialStore {
    /// `log_n` is the scrypt cost exponent (14 matches the stored format).
    pub fn new(log_n: u8) -> Result<Self, String> {
        let params = scrypt::Params::new(log_n, 8, 1, HASH_LEN)
            .map_err(|e| format!("invalid scrypt parameters: {}", e))?;
        Ok(Self {
            accounts: RwLock::new(HashMap::new()),
            params,
        })
    }

    /// Load accounts from disk. Invalid records are dropped one by one; an
    /// unreadable file starts the store empty.
    pub fn load(path: &Path, log_n: u8) -> Result<Self, String> {
        let mut store = Self::new(log_n)?;
        let table = match read_table(path) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!("Ignoring unreadable accounts file {}: {}", path.display(), e);
                Default::default()
            }
        };

        let mut accounts = HashMap::new();
        let total = table.len();
        for (key, record) in table {
            let Some(username) = sanitize_username(Some(&key)) else {
                continue;
            };
            let field = |name: &str| {
                record
                    .get(name)
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            let (Some(salt), Some(hash)) = (field("salt"), field("hash")) else {
                continue;
            };
            let profile_id = sanitize_profile_id(field("profileId").as_deref())
                .unwrap_or_else(|| profile_id_for(&username));
            accounts.insert(
                username.clone(),
                Account {
                    username,
                    salt,
                    hash,
                    profile_id,
                },
            );
        }
        if accounts.len() < total {
            tracing::warn!("Dropped {} invalid account records", total - accounts.len());
        }
        tracing::info!("Loaded {} accounts", accounts.len());

        *store.accounts.get_mut() = accounts;
        Ok(store)
    }

    pub async fn register(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Authenticated, AuthError> {
        let username = sanitize_username(username).ok_or(AuthError::UsernameInvalid)?;
        let password = check_password(password)?;
        if self.accounts.read().await.contains_key(&username) {
            return Err(AuthError::UsernameTaken);
        }

        let salt = random_salt();
        let hash = derive(self.params.clone(), password.to_string(), salt.clone()).await?;

        // Re-check: another registration may have won while we were hashing
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&username) {
            return Err(AuthError::UsernameTaken);
        }
        let profile_id = profile_id_for(&username);
        accounts.insert(
            username.clone(),
            Account {
                username: username.clone(),
                salt,
                hash: hex::encode(hash),
                profile_id: profile_id.clone(),
            },
        );
        tracing::info!("Registered account {}", username);
        Ok(Authenticated {
            username,
            profile_id,
        })
    }

    pub async fn verify(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Authenticated, AuthError> {
        let username = sanitize_username(username).ok_or(AuthError::InvalidCredentials)?;
        let password = check_password(password).map_err(|_| AuthError::InvalidCredentials)?;

        let account = self.accounts.read().await.get(&username).cloned();
        let salt = account
            .as_ref()
            .map_or_else(|| DUMMY_SALT.to_string(), |a| a.salt.clone());
        let derived = derive(self.params.clone(), password.to_string(), salt).await?;

        let Some(account) = account else {
            return Err(AuthError::InvalidCredentials);
        };
        let expected = hex::decode(&account.hash).unwrap_or_default();
        if bool::from(derived.as_slice().ct_eq(expected.as_slice())) {
            Ok(Authenticated {
                username: account.username,
                profile_id: account.profile_id,
            })
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }

    /// Serialised accounts table, ordered by username.
    pub async fn to_table_bytes(&self) -> Result<Vec<u8>, StorageError> {
        let accounts = self.accounts.read().await;
        let table: BTreeMap<&str, AccountRecord> = accounts
            .values()
            .map(|a| {
                (
                    a.username.as_str(),
                    AccountRecord {
                        salt: a.salt.clone(),
                        hash: a.hash.clone(),
                        profile_id: a.profile_id.clone(),
                    },
                )
            })
            .collect();
        Ok(serde_json::to_vec_pretty(&table)?)
    }
}
