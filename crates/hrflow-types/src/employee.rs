use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A reporting-line record from the external employee directory.
///
/// The engine only reads these; it needs nothing beyond who reports to whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Direct manager, if one is on file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<Uuid>,
    pub display_name: String,
}
