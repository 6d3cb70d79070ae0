//! Tenant-scoped knowledge documents: editorial lifecycle, chunking and
//! hybrid (embedding + keyword) passage search.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::embedding::{
    DEFAULT_DIMENSIONS, cosine_similarity, hashing_embedding, keyword_overlap, round_score,
};
use crate::error::{CoreError, CoreResult};
use crate::stages::Stage;
use crate::tenants::TenantId;

pub const MAX_TITLE_CHARS: usize = 200;
pub const CHUNK_MAX_WORDS: usize = 120;
pub const CHUNK_OVERLAP_WORDS: usize = 20;
pub const MAX_TOP_K: usize = 10;

const EMBEDDING_WEIGHT: f64 = 0.8;
const KEYWORD_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    InReview,
    Published,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Submit,
    Approve,
    Reject,
    Archive,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct KnowledgeDocument {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    /// Stages the content is written for. Empty means every stage.
    pub stages: Vec<Stage>,
    pub status: DocumentStatus,
    pub version: u32,
    pub author: String,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeDocument {
    pub fn new(
        tenant_id: TenantId,
        title: &str,
        body: &str,
        author: &str,
        at: DateTime<Utc>,
    ) -> CoreResult<Self> {
        let title = title.trim();
        if title.is_empty() {
            return Err(CoreError::validation("title", "title must not be empty"));
        }
        if title.chars().count() > MAX_TITLE_CHARS {
            return Err(CoreError::validation(
                "title",
                format!("title exceeds {MAX_TITLE_CHARS} characters"),
            ));
        }
        if body.trim().is_empty() {
            return Err(CoreError::validation("body", "body must not be empty"));
        }
        Ok(Self {
            id: Uuid::now_v7(),
            tenant_id,
            title: title.to_string(),
            body: body.to_string(),
            tags: Vec::new(),
            stages: Vec::new(),
            status: DocumentStatus::Draft,
            version: 1,
            author: author.to_string(),
            updated_at: at,
        })
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages = stages;
        self
    }

    fn move_to(
        &mut self,
        allowed_from: &[DocumentStatus],
        to: DocumentStatus,
        at: DateTime<Utc>,
    ) -> CoreResult<()> {
        if !allowed_from.contains(&self.status) {
            return Err(CoreError::conflict(format!(
                "document {} cannot move from {:?} to {:?}",
                self.id, self.status, to
            )));
        }
        self.status = to;
        self.updated_at = at;
        Ok(())
    }

    pub fn submit(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        self.move_to(&[DocumentStatus::Draft], DocumentStatus::InReview, at)
    }

    pub fn approve(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        self.move_to(&[DocumentStatus::InReview], DocumentStatus::Published, at)
    }

    pub fn reject(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        self.move_to(&[DocumentStatus::InReview], DocumentStatus::Draft, at)
    }

    pub fn archive(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        self.move_to(
            &[
                DocumentStatus::Draft,
                DocumentStatus::InReview,
                DocumentStatus::Published,
            ],
            DocumentStatus::Archived,
            at,
        )
    }

    pub fn apply(&mut self, action: LifecycleAction, at: DateTime<Utc>) -> CoreResult<()> {
        match action {
            LifecycleAction::Submit => self.submit(at),
            LifecycleAction::Approve => self.approve(at),
            LifecycleAction::Reject => self.reject(at),
            LifecycleAction::Archive => self.archive(at),
        }
    }

    /// Replace the body. Published content goes back to draft for review.
    pub fn revise(&mut self, body: &str, at: DateTime<Utc>) -> CoreResult<()> {
        if body.trim().is_empty() {
            return Err(CoreError::validation("body", "body must not be empty"));
        }
        self.move_to(
            &[DocumentStatus::Draft, DocumentStatus::Published],
            DocumentStatus::Draft,
            at,
        )?;
        self.body = body.to_string();
        self.version += 1;
        Ok(())
    }

    fn serves_stage(&self, stage: Option<Stage>) -> bool {
        match stage {
            Some(stage) => self.stages.is_empty() || self.stages.contains(&stage),
            None => true,
        }
    }
}

/// Split text into overlapping word windows.
pub fn chunk(body: &str, max_words: usize, overlap: usize) -> Vec<String> {
    let max_words = max_words.max(1);
    let overlap = overlap.min(max_words - 1);
    let words: Vec<&str> = body.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let step = max_words - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + max_words).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    chunks
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Passage {
    pub doc_id: Uuid,
    pub ordinal: usize,
    pub text: String,
    #[serde(skip)]
    pub embedding: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SearchHit {
    pub doc_id: Uuid,
    pub title: String,
    pub passage: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
struct IndexedDocument {
    doc: KnowledgeDocument,
    passages: Vec<Passage>,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    docs: HashMap<(TenantId, Uuid), IndexedDocument>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document and rebuild its passages.
    pub fn upsert(&mut self, doc: KnowledgeDocument) {
        let passages = chunk(&doc.body, CHUNK_MAX_WORDS, CHUNK_OVERLAP_WORDS)
            .into_iter()
            .enumerate()
            .map(|(ordinal, text)| Passage {
                doc_id: doc.id,
                ordinal,
                embedding: hashing_embedding(
                    &format!("{} {}", doc.title, text),
                    DEFAULT_DIMENSIONS,
                ),
                text,
            })
            .collect();
        tracing::debug!(tenant_id = %doc.tenant_id, doc_id = %doc.id, "indexed knowledge document");
        self.docs
            .insert((doc.tenant_id.clone(), doc.id), IndexedDocument { doc, passages });
    }

    pub fn get(&self, tenant: &TenantId, id: Uuid) -> CoreResult<&KnowledgeDocument> {
        self.docs
            .get(&(tenant.clone(), id))
            .map(|d| &d.doc)
            .ok_or_else(|| CoreError::not_found(format!("knowledge document {id}")))
    }

    pub fn remove(&mut self, tenant: &TenantId, id: Uuid) -> CoreResult<KnowledgeDocument> {
        self.docs
            .remove(&(tenant.clone(), id))
            .map(|d| d.doc)
            .ok_or_else(|| CoreError::not_found(format!("knowledge document {id}")))
    }

    pub fn count(&self, tenant: &TenantId) -> usize {
        self.docs.keys().filter(|(t, _)| t == tenant).count()
    }

    pub fn passages(&self, tenant: &TenantId, id: Uuid) -> CoreResult<&[Passage]> {
        self.docs
            .get(&(tenant.clone(), id))
            .map(|d| d.passages.as_slice())
            .ok_or_else(|| CoreError::not_found(format!("knowledge document {id}")))
    }

    /// Best passage per published document, highest score first.
    pub fn search(
        &self,
        tenant: &TenantId,
        query: &str,
        stage: Option<Stage>,
        top_k: usize,
    ) -> Vec<SearchHit> {
        let top_k = top_k.clamp(1, MAX_TOP_K);
        if query.trim().is_empty() {
            return Vec::new();
        }
        let query_embedding = hashing_embedding(query, DEFAULT_DIMENSIONS);

        let mut hits: Vec<SearchHit> = self
            .docs
            .iter()
            .filter(|((t, _), _)| t == tenant)
            .map(|(_, indexed)| indexed)
            .filter(|d| d.doc.status == DocumentStatus::Published && d.doc.serves_stage(stage))
            .filter_map(|d| {
                d.passages
                    .iter()
                    .map(|p| {
                        let haystack = format!("{} {}", d.doc.title, p.text);
                        let lexical = keyword_overlap(query, &haystack);
                        let score = EMBEDDING_WEIGHT
                            * cosine_similarity(&query_embedding, &p.embedding)
                            + KEYWORD_WEIGHT * lexical;
                        (p, score)
                    })
                    .max_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(p, score)| SearchHit {
                        doc_id: d.doc.id,
                        title: d.doc.title.clone(),
                        passage: p.text.clone(),
                        score: round_score(score),
                    })
            })
            .filter(|hit| hit.score > 0.0)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        hits.truncate(top_k);
        hits
    }
}
