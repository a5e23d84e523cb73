/// Activation Code Management
use crate::{
    clock::Clock,
    db::{ActivationCode, AuditEntry, CodeStatus, RelationalStore, RevokeOutcome},
    error::{PortalError, PortalResult},
};
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::Arc;

/// Uppercase letters and digits without 0/O, 1/I/L
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

pub const QUANTITY_RANGE: RangeInclusive<usize> = 1..=500;
pub const LENGTH_RANGE: RangeInclusive<usize> = 16..=24;
pub const DEFAULT_LENGTH: usize = 16;
const MAX_PREFIX_LEN: usize = 12;

/// Canonical form of a user-supplied code
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Generate `quantity` distinct codes of `length` random characters after `prefix`
pub fn generate(quantity: usize, prefix: Option<&str>, length: usize) -> PortalResult<Vec<String>> {
    if !QUANTITY_RANGE.contains(&quantity) {
        return Err(PortalError::Validation(format!(
            "Quantity must be between {} and {}",
            QUANTITY_RANGE.start(),
            QUANTITY_RANGE.end()
        )));
    }

    if !LENGTH_RANGE.contains(&length) {
        return Err(PortalError::Validation(format!(
            "Length must be between {} and {}",
            LENGTH_RANGE.start(),
            LENGTH_RANGE.end()
        )));
    }

    let prefix = match prefix.map(normalize_code).filter(|p| !p.is_empty()) {
        Some(p) => {
            if p.len() > MAX_PREFIX_LEN
                || !p.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            {
                return Err(PortalError::Validation(
                    "Prefix may only contain letters, digits and '-'".to_string(),
                ));
            }
            p
        }
        None => String::new(),
    };

    let mut rng = OsRng;
    let mut codes = Vec::with_capacity(quantity);
    let mut seen = HashSet::with_capacity(quantity);

    while codes.len() < quantity {
        let body: String = (0..length)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        let code = format!("{}{}", prefix, body);
        if seen.insert(code.clone()) {
            codes.push(code);
        }
    }

    Ok(codes)
}

/// Request to mint a batch of codes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateCodesRequest {
    pub quantity: usize,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub length: Option<usize>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Activation code lifecycle manager
#[derive(Clone)]
pub struct ActivationCodeManager {
    store: Arc<dyn RelationalStore>,
    clock: Arc<dyn Clock>,
}

impl ActivationCodeManager {
    pub fn new(store: Arc<dyn RelationalStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Mint and persist a batch of `unused` codes
    pub async fn create_batch(
        &self,
        request: &GenerateCodesRequest,
        actor: &str,
    ) -> PortalResult<Vec<String>> {
        let length = request.length.unwrap_or(DEFAULT_LENGTH);
        let codes = generate(request.quantity, request.prefix.as_deref(), length)?;
        let note = request
            .note
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());

        let now = self.clock.now();
        self.store.insert_codes(&codes, note, now).await?;

        tracing::info!(actor, count = codes.len(), "generated activation codes");
        self.audit(
            AuditEntry::new(actor, "codes.generate").details(json!({
                "count": codes.len(),
                "prefix": request.prefix,
                "note": note,
            })),
        )
        .await;

        Ok(codes)
    }

    /// Revoke every `unused` code in the batch, counting the rest as skipped
    pub async fn revoke_batch(&self, codes: &[String], actor: &str) -> PortalResult<RevokeOutcome> {
        let mut seen = HashSet::new();
        let normalized: Vec<String> = codes
            .iter()
            .map(|c| normalize_code(c))
            .filter(|c| !c.is_empty())
            .filter(|c| seen.insert(c.clone()))
            .collect();

        if normalized.is_empty() {
            return Err(PortalError::Validation("No codes supplied".to_string()));
        }

        let outcome = self.store.revoke_codes(&normalized).await?;

        tracing::info!(actor, updated = outcome.updated, skipped = outcome.skipped, "revoked activation codes");
        self.audit(
            AuditEntry::new(actor, "codes.revoke").details(json!({
                "updated": outcome.updated,
                "skipped": outcome.skipped,
            })),
        )
        .await;

        Ok(outcome)
    }

    pub async fn get(&self, code: &str) -> PortalResult<Option<ActivationCode>> {
        Ok(self.store.get_code(&normalize_code(code)).await?)
    }

    pub async fn list(&self, status: Option<CodeStatus>, limit: i64) -> PortalResult<Vec<ActivationCode>> {
        Ok(self.store.list_codes(status, limit.clamp(1, 1000)).await?)
    }

    async fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.store.record_audit(&entry, self.clock.now()).await {
            tracing::warn!(action = %entry.action, "failed to write audit record: {}", e);
        }
    }
}
