//! Widget API-key → chatbot authorization, keyed by web domain.
//!
//! The index is an immutable snapshot behind an `Arc`. A refresh builds a
//! complete new snapshot and swaps it in under the write lock, so readers
//! see either the old index or the new one, never a mix.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cb_domain::error::Result;
use cb_domain::tenant::DomainAccessEntry;
use cb_domain::trace::TraceEvent;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Source of the full grant list, reloaded on every refresh.
#[async_trait::async_trait]
pub trait DomainAccessSource: Send + Sync {
    async fn load(&self) -> Result<Vec<DomainAccessEntry>>;
}

/// Grants fixed at startup (`[[domains]]` in the config file).
pub struct StaticDomainSource {
    entries: Vec<DomainAccessEntry>,
}

impl StaticDomainSource {
    pub fn new(entries: Vec<DomainAccessEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait::async_trait]
impl DomainAccessSource for StaticDomainSource {
    async fn load(&self) -> Result<Vec<DomainAccessEntry>> {
        Ok(self.entries.clone())
    }
}

struct Grant {
    key_digest: [u8; 32],
    chatbot_id: String,
}

#[derive(Default)]
struct Snapshot {
    by_domain: HashMap<String, Vec<Grant>>,
    entries: usize,
}

#[derive(Default)]
pub struct DomainAccessIndex {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl DomainAccessIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole index. Entries whose domain normalizes to nothing
    /// are skipped.
    pub fn replace(&self, entries: &[DomainAccessEntry]) {
        let mut next = Snapshot::default();
        for entry in entries {
            let Some(domain) = normalize_domain(&entry.allowed_domain) else {
                tracing::warn!(
                    chatbot_id = %entry.chatbot_id,
                    allowed_domain = %entry.allowed_domain,
                    "skipping access entry with unusable domain"
                );
                continue;
            };
            next.by_domain.entry(domain).or_default().push(Grant {
                key_digest: digest(entry.api_key.expose()),
                chatbot_id: entry.chatbot_id.clone(),
            });
            next.entries += 1;
        }

        let (domains, count) = (next.by_domain.len(), next.entries);
        *self.snapshot.write() = Arc::new(next);
        TraceEvent::DomainIndexRefreshed {
            domains,
            entries: count,
        }
        .emit();
    }

    /// Chatbot the key may drive from `origin`, if any.
    pub fn authorize(&self, api_key: &str, origin: &str) -> Option<String> {
        let domain = normalize_domain(origin)?;
        let presented = digest(api_key);
        let snapshot = self.snapshot.read().clone();
        snapshot
            .by_domain
            .get(&domain)?
            .iter()
            .find(|g| bool::from(g.key_digest[..].ct_eq(&presented[..])))
            .map(|g| g.chatbot_id.clone())
    }

    pub fn domain_count(&self) -> usize {
        self.snapshot.read().by_domain.len()
    }

    pub fn entry_count(&self) -> usize {
        self.snapshot.read().entries
    }

    /// Load once from `source` and swap in the result. On error the
    /// current snapshot is kept.
    pub async fn refresh_from(&self, source: &dyn DomainAccessSource) -> Result<()> {
        let entries = source.load().await?;
        self.replace(&entries);
        Ok(())
    }
}

fn digest(secret: &str) -> [u8; 32] {
    Sha256::digest(secret.as_bytes()).into()
}

/// Reduce an origin, URL or bare host to a comparable domain: lowercase,
/// no scheme, credentials, port, path or leading `www.`.
pub fn normalize_domain(raw: &str) -> Option<String> {
    let mut s = raw.trim().to_ascii_lowercase();
    if let Some(idx) = s.find("://") {
        s = s[idx + 3..].to_string();
    }
    if let Some(idx) = s.find(['/', '?', '#']) {
        s.truncate(idx);
    }
    if let Some(idx) = s.rfind('@') {
        s = s[idx + 1..].to_string();
    }
    if let Some(idx) = s.rfind(':') {
        if s[idx + 1..].chars().all(|c| c.is_ascii_digit()) {
            s.truncate(idx);
        }
    }
    let s = s.trim_end_matches('.');
    let s = s.strip_prefix("www.").unwrap_or(s);
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Periodically reload `index` from `source` until `shutdown` fires. The
/// first reload happens one full interval after start.
pub fn spawn_refresher(
    index: Arc<DomainAccessIndex>,
    source: Arc<dyn DomainAccessSource>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = index.refresh_from(source.as_ref()).await {
                        tracing::warn!(error = %e, "domain access refresh failed, keeping previous index");
                    }
                }
            }
        }
        tracing::debug!("domain access refresher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cb_domain::error::Error;
    use cb_domain::tenant::ApiKey;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(key: &str, bot: &str, domain: &str) -> DomainAccessEntry {
        DomainAccessEntry {
            api_key: ApiKey::new(key),
            chatbot_id: bot.into(),
            allowed_domain: domain.into(),
        }
    }

    #[test]
    fn normalizes_origins() {
        assert_eq!(normalize_domain("https://WWW.Shop.example.com:8443/cart?x=1").as_deref(), Some("shop.example.com"));
        assert_eq!(normalize_domain("shop.example.com.").as_deref(), Some("shop.example.com"));
        assert_eq!(normalize_domain("http://user:pw@example.org").as_deref(), Some("example.org"));
        assert_eq!(normalize_domain("  "), None);
        assert_eq!(normalize_domain("https://"), None);
    }

    #[test]
    fn authorizes_matching_key_and_domain_only() {
        let index = DomainAccessIndex::new();
        index.replace(&[
            entry("key-a", "bot-a", "shop.example.com"),
            entry("key-b", "bot-b", "https://www.blog.example.com"),
            entry("key-c", "bot-c", "shop.example.com"),
        ]);
        assert_eq!(index.domain_count(), 2);
        assert_eq!(index.entry_count(), 3);

        assert_eq!(index.authorize("key-a", "https://shop.example.com").as_deref(), Some("bot-a"));
        assert_eq!(index.authorize("key-c", "shop.example.com").as_deref(), Some("bot-c"));
        assert_eq!(index.authorize("key-b", "blog.example.com").as_deref(), Some("bot-b"));
        assert_eq!(index.authorize("key-a", "blog.example.com"), None);
        assert_eq!(index.authorize("wrong", "shop.example.com"), None);
        assert_eq!(index.authorize("key-a", ""), None);
    }

    #[test]
    fn replace_is_wholesale() {
        let index = DomainAccessIndex::new();
        index.replace(&[entry("k", "old", "a.example.com")]);
        index.replace(&[entry("k", "new", "b.example.com")]);
        assert_eq!(index.authorize("k", "a.example.com"), None);
        assert_eq!(index.authorize("k", "b.example.com").as_deref(), Some("new"));
    }

    struct FlakySource {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DomainAccessSource for FlakySource {
        async fn load(&self) -> Result<Vec<DomainAccessEntry>> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(Error::Storage("db down".into())),
                _ => Ok(vec![entry("k2", "bot-2", "two.example.com")]),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_previous_snapshot() {
        let index = Arc::new(DomainAccessIndex::new());
        index.replace(&[entry("k1", "bot-1", "one.example.com")]);
        let source = Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
        });
        let shutdown = CancellationToken::new();
        let handle = spawn_refresher(index.clone(), source.clone(), Duration::from_secs(60), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(index.authorize("k1", "one.example.com").as_deref(), Some("bot-1"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(index.authorize("k1", "one.example.com"), None);
        assert_eq!(index.authorize("k2", "two.example.com").as_deref(), Some("bot-2"));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
