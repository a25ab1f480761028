use sha2::{Digest, Sha256};

use crate::models::{ContextDocument, PrivilegeClass};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    pub serialized: String,
    pub document_count: usize,
    pub highest_privilege: PrivilegeClass,
    /// SHA-256 of `serialized`, hex encoded. Traces record this instead of the text.
    pub digest: String,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.document_count == 0
    }
}

/// Selects the documents in scope and serializes them in input order.
///
/// A matter id wins over knowledge-base ids; with neither, every document is
/// in scope.
pub fn assemble(
    documents: &[ContextDocument],
    matter_id: Option<&str>,
    knowledge_base_ids: Option<&[String]>,
) -> AssembledContext {
    let selected = documents
        .iter()
        .filter(|document| in_scope(document, matter_id, knowledge_base_ids))
        .collect::<Vec<_>>();

    let serialized = selected
        .iter()
        .map(|document| {
            format!(
                "Doc: {} ({}), Matter: {}",
                document.name, document.id, document.matter_id
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let highest_privilege = selected
        .iter()
        .map(|document| document.privilege)
        .max()
        .unwrap_or_default();

    AssembledContext {
        digest: digest_hex(&serialized),
        document_count: selected.len(),
        highest_privilege,
        serialized,
    }
}

fn in_scope(
    document: &ContextDocument,
    matter_id: Option<&str>,
    knowledge_base_ids: Option<&[String]>,
) -> bool {
    if let Some(matter_id) = matter_id {
        return document.matter_id == matter_id;
    }

    match knowledge_base_ids {
        Some(ids) => ids.iter().any(|id| *id == document.id),
        None => true,
    }
}

fn digest_hex(value: &str) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}
