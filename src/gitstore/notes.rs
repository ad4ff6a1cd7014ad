//! Namespaced note store for findings, goals, phase records, and cascade logs.
//!
//! Ref layout:
//! ```text
//! refs/notes/empirica/<namespace>/<id>
//! refs/notes/empirica/session/<session_id>/<PHASE>/<round>
//! refs/notes/empirica/cascades/<session_id>/<transaction_id>
//! ```
//! Namespaced notes hold one JSON blob each; cascade notes are line-delimited
//! append logs (`LABEL: {json}` per line). Writes use `-f`, so concurrent
//! writers to the same ref resolve last-writer-wins and readers see an
//! eventually-consistent view.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::GitWorkspace;
use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{Phase, Reflex};

/// Artifact namespaces under `refs/notes/empirica/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Findings,
    Unknowns,
    DeadEnds,
    Mistakes,
    Goals,
    Tasks,
    Handoff,
    Signatures,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Findings => "findings",
            Self::Unknowns => "unknowns",
            Self::DeadEnds => "dead_ends",
            Self::Mistakes => "mistakes",
            Self::Goals => "goals",
            Self::Tasks => "tasks",
            Self::Handoff => "handoff",
            Self::Signatures => "signatures",
        }
    }
}

pub struct GitNotesStore {
    workspace: GitWorkspace,
}

impl GitNotesStore {
    pub const REF_ROOT: &'static str = "refs/notes/empirica";

    pub fn new(workspace: GitWorkspace) -> Self {
        Self { workspace }
    }

    pub fn workspace(&self) -> &GitWorkspace {
        &self.workspace
    }

    /// Store a JSON payload under `<namespace>/<id>`. The ref name is the
    /// stable public id.
    pub async fn put<T: Serialize>(
        &self,
        namespace: Namespace,
        id: &str,
        payload: &T,
    ) -> KernelResult<()> {
        if id.is_empty() {
            return Err(KernelError::BadInput("note id is empty".into()));
        }
        let json = serde_json::to_string_pretty(payload)?;
        self.workspace
            .write_note(&format!("empirica/{}/{id}", namespace.as_str()), &json)
            .await
    }

    /// Load and decode a single note. None when the ref does not exist.
    pub async fn get<T: DeserializeOwned>(
        &self,
        namespace: Namespace,
        id: &str,
    ) -> KernelResult<Option<T>> {
        let full_ref = format!("{}/{}/{id}", Self::REF_ROOT, namespace.as_str());
        match self.workspace.read_note_blob(&full_ref).await {
            Ok(blob) => Ok(Some(serde_json::from_str(&blob)?)),
            Err(KernelError::Git(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List note ids in a namespace.
    pub async fn list_ids(&self, namespace: Namespace) -> KernelResult<Vec<String>> {
        let prefix = format!("{}/{}/", Self::REF_ROOT, namespace.as_str());
        let refs = self.workspace.list_refs(&prefix).await?;
        Ok(refs
            .iter()
            .filter_map(|r| r.strip_prefix(&prefix))
            .map(String::from)
            .collect())
    }

    /// Load every note in a namespace, skipping undecodable blobs.
    pub async fn load_all<T: DeserializeOwned>(
        &self,
        namespace: Namespace,
    ) -> KernelResult<Vec<T>> {
        let prefix = format!("{}/{}/", Self::REF_ROOT, namespace.as_str());
        let refs = self.workspace.list_refs(&prefix).await?;
        let mut items = Vec::with_capacity(refs.len());
        for full_ref in refs {
            match self.workspace.read_note_blob(&full_ref).await {
                Ok(blob) => match serde_json::from_str(&blob) {
                    Ok(item) => items.push(item),
                    Err(e) => debug!(r#ref = %full_ref, error = %e, "skipping undecodable note"),
                },
                Err(e) => debug!(r#ref = %full_ref, error = %e, "skipping unreadable note"),
            }
        }
        Ok(items)
    }

    /// Mirror a phase record at `session/<session_id>/<PHASE>/<round>`.
    pub async fn put_phase_record(&self, reflex: &Reflex) -> KernelResult<()> {
        let note_ref = format!(
            "empirica/session/{}/{}/{}",
            reflex.session_id,
            reflex.phase.as_str(),
            reflex.round
        );
        let json = serde_json::to_string_pretty(reflex)?;
        self.workspace.write_note(&note_ref, &json).await
    }

    /// Load a phase record back.
    pub async fn get_phase_record(
        &self,
        session_id: Uuid,
        phase: Phase,
        round: u32,
    ) -> KernelResult<Option<Reflex>> {
        let full_ref = format!(
            "{}/session/{session_id}/{}/{round}",
            Self::REF_ROOT,
            phase.as_str()
        );
        match self.workspace.read_note_blob(&full_ref).await {
            Ok(blob) => Ok(Some(serde_json::from_str(&blob)?)),
            Err(KernelError::Git(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Append a labeled line to a cascade transaction log
    /// (`cascades/<session_id>/<transaction_id>`, `LABEL: {json}` per line).
    pub async fn append_cascade_entry<T: Serialize>(
        &self,
        session_id: Uuid,
        transaction_id: Uuid,
        label: &str,
        payload: &T,
    ) -> KernelResult<()> {
        let note_ref = format!("empirica/cascades/{session_id}/{transaction_id}");
        let full_ref = format!("refs/notes/{note_ref}");

        let existing = match self.workspace.read_note_blob(&full_ref).await {
            Ok(blob) => blob,
            Err(KernelError::Git(_)) => String::new(),
            Err(e) => return Err(e),
        };

        let line = format!("{label}: {}", serde_json::to_string(payload)?);
        let mut content = existing;
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&line);
        content.push('\n');

        self.workspace.write_note(&note_ref, &content).await
    }

    /// Read a cascade log back as (label, json) pairs.
    pub async fn read_cascade_log(
        &self,
        session_id: Uuid,
        transaction_id: Uuid,
    ) -> KernelResult<Vec<(String, serde_json::Value)>> {
        let full_ref = format!(
            "{}/cascades/{session_id}/{transaction_id}",
            Self::REF_ROOT
        );
        let blob = match self.workspace.read_note_blob(&full_ref).await {
            Ok(blob) => blob,
            Err(KernelError::Git(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        for line in blob.lines() {
            let Some((label, json)) = line.split_once(": ") else {
                continue;
            };
            match serde_json::from_str(json) {
                Ok(value) => entries.push((label.to_string(), value)),
                Err(e) => debug!(error = %e, "skipping malformed cascade log line"),
            }
        }
        Ok(entries)
    }
}
