//! Resources agent: ranked learning material per topic.
//!
//! Lookups go cache first, then the optional vector store, then the curated
//! catalogue. The catalogue is never empty, so every task that asks for
//! resources gets at least one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use super::{unsupported, Agent, AgentContext, AgentRequest, AgentResult, AgentType, Services};
use crate::error::{CoachError, Result};
use crate::llm::http_client;
use crate::models::{Resource, ResourceKind};

const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 20;
const EMBED_DIM: usize = 256;
const DEFAULT_COLLECTION: &str = "learning_resources";

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    stored_at: Instant,
    resources: Vec<Resource>,
}

/// Process-wide per-topic cache with a fixed TTL. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ResourceCache {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

impl ResourceCache {
    /// Creates an empty cache whose entries expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fresh entry for `topic`, if any.
    #[must_use]
    pub fn get(&self, topic: &str, now: Instant) -> Option<Vec<Resource>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&cache_key(topic))
            .filter(|e| now.saturating_duration_since(e.stored_at) < self.ttl)
            .map(|e| e.resources.clone())
    }

    /// Stores `resources` for `topic`.
    pub fn put(&self, topic: &str, resources: Vec<Resource>, now: Instant) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, e| now.saturating_duration_since(e.stored_at) < self.ttl);
        entries.insert(
            cache_key(topic),
            CacheEntry {
                stored_at: now,
                resources,
            },
        );
    }

    /// Number of stored topics, stale ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cache_key(topic: &str) -> String {
    topic.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

// ============================================================================
// Vector store
// ============================================================================

/// Deterministic token-hash embedding, normalised to unit length.
#[must_use]
pub fn embed(text: &str, dim: usize) -> Vec<f32> {
    let dim = dim.max(1);
    let mut v = vec![0.0f32; dim];
    for token in text.to_lowercase().split_whitespace() {
        let digest = Sha256::digest(token.as_bytes());
        let idx = usize::from(digest[0]) % dim;
        let sign = if digest[1] % 2 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    score: f32,
    #[serde(default)]
    payload: Option<HitPayload>,
}

#[derive(Deserialize)]
struct HitPayload {
    title: String,
    url: String,
    #[serde(default)]
    kind: ResourceKind,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    difficulty: Option<u8>,
}

/// Qdrant HTTP client for semantic resource search.
#[derive(Debug, Clone)]
pub struct VectorStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
}

impl VectorStore {
    /// Creates a client for the Qdrant instance at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }

    /// Searches the resource collection for `topic`.
    ///
    /// # Errors
    ///
    /// Returns `CoachError::UpstreamUnavailable` if the request fails.
    pub async fn search(&self, topic: &str, limit: usize) -> Result<Vec<Resource>> {
        let vector = embed(topic, EMBED_DIM);
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection
        );
        let response = self
            .client
            .post(url)
            .json(&SearchRequest {
                vector: &vector,
                limit,
                with_payload: true,
            })
            .send()
            .await
            .map_err(|e| CoachError::upstream("vector_store", e.to_string()))?;
        if !response.status().is_success() {
            return Err(CoachError::upstream(
                "vector_store",
                format!("search returned HTTP {}", response.status()),
            ));
        }
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| CoachError::upstream("vector_store", e.to_string()))?;

        Ok(body
            .result
            .into_iter()
            .filter_map(|hit| {
                let payload = hit.payload?;
                Some(Resource {
                    id: resource_id(&payload.url),
                    title: payload.title,
                    url: payload.url,
                    kind: payload.kind,
                    topic: if payload.topic.is_empty() { topic.to_string() } else { payload.topic },
                    quality: hit.score.clamp(0.0, 1.0),
                    difficulty: payload.difficulty.unwrap_or(3),
                })
            })
            .collect())
    }
}

// ============================================================================
// Curated catalogue
// ============================================================================

struct Curated {
    title: &'static str,
    url: &'static str,
    kind: ResourceKind,
    keywords: &'static [&'static str],
    quality: f32,
    difficulty: u8,
}

const CATALOGUE: &[Curated] = &[
    Curated {
        title: "The Python Tutorial",
        url: "https://docs.python.org/3/tutorial/",
        kind: ResourceKind::Documentation,
        keywords: &["python", "basics", "variables", "loops", "functions", "control flow"],
        quality: 0.95,
        difficulty: 2,
    },
    Curated {
        title: "Python data structures",
        url: "https://docs.python.org/3/tutorial/datastructures.html",
        kind: ResourceKind::Documentation,
        keywords: &["python", "list", "dict", "dictionary", "data structures", "collections"],
        quality: 0.9,
        difficulty: 3,
    },
    Curated {
        title: "Defining your own Python function",
        url: "https://realpython.com/defining-your-own-python-function/",
        kind: ResourceKind::Tutorial,
        keywords: &["python", "functions", "parameters"],
        quality: 0.85,
        difficulty: 3,
    },
    Curated {
        title: "Thinking recursively in Python",
        url: "https://realpython.com/python-thinking-recursively/",
        kind: ResourceKind::Article,
        keywords: &["recursion", "python", "algorithm"],
        quality: 0.8,
        difficulty: 5,
    },
    Curated {
        title: "unittest: unit testing framework",
        url: "https://docs.python.org/3/library/unittest.html",
        kind: ResourceKind::Documentation,
        keywords: &["testing", "tests", "python", "unittest"],
        quality: 0.85,
        difficulty: 4,
    },
    Curated {
        title: "MDN JavaScript Guide",
        url: "https://developer.mozilla.org/en-US/docs/Web/JavaScript/Guide",
        kind: ResourceKind::Documentation,
        keywords: &["javascript", "js", "basics", "variables", "functions"],
        quality: 0.95,
        difficulty: 2,
    },
    Curated {
        title: "MDN: Loops and iteration",
        url: "https://developer.mozilla.org/en-US/docs/Web/JavaScript/Guide/Loops_and_iteration",
        kind: ResourceKind::Documentation,
        keywords: &["javascript", "loops", "iteration", "control flow"],
        quality: 0.9,
        difficulty: 2,
    },
    Curated {
        title: "MDN: Map",
        url: "https://developer.mozilla.org/en-US/docs/Web/JavaScript/Reference/Global_Objects/Map",
        kind: ResourceKind::Documentation,
        keywords: &["javascript", "map", "hash", "dictionary", "collections"],
        quality: 0.85,
        difficulty: 4,
    },
    Curated {
        title: "The Modern JavaScript Tutorial",
        url: "https://javascript.info/",
        kind: ResourceKind::Tutorial,
        keywords: &["javascript", "js", "basics", "objects", "async", "functions"],
        quality: 0.9,
        difficulty: 3,
    },
    Curated {
        title: "MDN: An overview of HTTP",
        url: "https://developer.mozilla.org/en-US/docs/Web/HTTP/Overview",
        kind: ResourceKind::Article,
        keywords: &["http", "web", "api", "rest"],
        quality: 0.85,
        difficulty: 4,
    },
    Curated {
        title: "CS50x lectures",
        url: "https://cs50.harvard.edu/x/",
        kind: ResourceKind::Video,
        keywords: &["basics", "algorithm", "algorithms", "memory", "data structures", "programming"],
        quality: 0.95,
        difficulty: 3,
    },
    Curated {
        title: "VisuAlgo: visualising data structures and algorithms",
        url: "https://visualgo.net/en",
        kind: ResourceKind::Video,
        keywords: &["sorting", "search", "algorithm", "algorithms", "stack", "intervals"],
        quality: 0.85,
        difficulty: 5,
    },
    Curated {
        title: "Big-O cheat sheet",
        url: "https://www.bigocheatsheet.com/",
        kind: ResourceKind::Article,
        keywords: &["complexity", "big-o", "algorithm", "algorithms", "performance"],
        quality: 0.75,
        difficulty: 6,
    },
    Curated {
        title: "Exercism Python track",
        url: "https://exercism.org/tracks/python",
        kind: ResourceKind::Exercise,
        keywords: &["python", "practice", "exercises", "string", "list"],
        quality: 0.85,
        difficulty: 3,
    },
    Curated {
        title: "Exercism JavaScript track",
        url: "https://exercism.org/tracks/javascript",
        kind: ResourceKind::Exercise,
        keywords: &["javascript", "js", "practice", "exercises", "string", "array"],
        quality: 0.85,
        difficulty: 3,
    },
    Curated {
        title: "Pro Git",
        url: "https://git-scm.com/book/en/v2",
        kind: ResourceKind::Documentation,
        keywords: &["git", "version control", "project", "collaboration"],
        quality: 0.9,
        difficulty: 3,
    },
];

fn resource_id(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
    format!("res-{hex}")
}

/// Catalogue entries ranked for `topic`; never empty.
#[must_use]
pub fn catalogue_for(topic: &str, limit: usize) -> Vec<Resource> {
    let lower = topic.to_lowercase();
    let mut ranked: Vec<(f32, &Curated)> = CATALOGUE
        .iter()
        .map(|c| {
            #[allow(clippy::cast_precision_loss)]
            let matches = c.keywords.iter().filter(|k| lower.contains(*k)).count() as f32;
            (matches * 2.0 + c.quality, c)
        })
        .collect();
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

    ranked
        .into_iter()
        .take(limit.max(1))
        .map(|(_, c)| Resource {
            id: resource_id(c.url),
            title: c.title.to_string(),
            url: c.url.to_string(),
            kind: c.kind,
            topic: topic.to_string(),
            quality: c.quality,
            difficulty: c.difficulty,
        })
        .collect()
}

/// Lookup outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLookup {
    /// Normalised topic.
    pub topic: String,
    /// Ranked resources, best first.
    pub resources: Vec<Resource>,
    /// Whether the answer came from the cache.
    pub from_cache: bool,
}

/// Ranked resources for `topic`, consulting cache, vector store and catalogue.
pub(crate) async fn lookup(
    services: &Services,
    topic: &str,
    limit: usize,
    warnings: &mut Vec<String>,
) -> ResourceLookup {
    let key = cache_key(topic);
    if let Some(mut cached) = services.resources.get(&key, Instant::now()) {
        debug!(topic = %key, "Resource cache hit");
        cached.truncate(limit);
        return ResourceLookup {
            topic: key,
            resources: cached,
            from_cache: true,
        };
    }

    let mut resources = Vec::new();
    if let Some(store) = &services.vector_store {
        match store.search(&key, MAX_LIMIT).await {
            Ok(found) => resources = found,
            Err(e) => {
                warn!(error = %e, "Vector search failed");
                warnings.push("Vector search unavailable; using the curated catalogue".to_string());
            }
        }
    }
    for curated in catalogue_for(&key, MAX_LIMIT) {
        if !resources.iter().any(|r| r.url == curated.url) {
            resources.push(curated);
        }
    }
    resources.truncate(MAX_LIMIT);
    services.resources.put(&key, resources.clone(), Instant::now());

    resources.truncate(limit.max(1));
    ResourceLookup {
        topic: key,
        resources,
        from_cache: false,
    }
}

/// Shorthand for [`lookup`] returning only the resources.
pub(crate) async fn find(
    services: &Services,
    topic: &str,
    limit: usize,
    warnings: &mut Vec<String>,
) -> Vec<Resource> {
    lookup(services, topic, limit, warnings).await.resources
}

// ============================================================================
// Agent
// ============================================================================

/// Discovers learning resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourcesAgent;

#[async_trait]
impl Agent for ResourcesAgent {
    fn agent_type(&self) -> AgentType {
        AgentType::Resources
    }

    #[instrument(skip(self, ctx), fields(user_id = %ctx.user_id))]
    async fn process(&self, ctx: AgentContext) -> Result<AgentResult> {
        let AgentRequest::DiscoverResources { topic, limit } = &ctx.request else {
            return Err(unsupported(self.agent_type(), &ctx.request));
        };
        if topic.trim().is_empty() {
            return Err(CoachError::validation("topic must not be empty"));
        }
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

        let mut warnings = Vec::new();
        let found = lookup(&ctx.services, topic, limit, &mut warnings).await;
        AgentResult::ok(&found, warnings)
    }
}
