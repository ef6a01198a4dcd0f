use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Directory view of an employee. Owned by the employee directory; the
/// attendance core only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "employee_id": "2261001",
        "name": "John Doe",
        "rfid_tag": "AA11",
        "is_active": true
    })
)]
pub struct Employee {
    #[schema(example = "2261001")]
    pub employee_id: String,

    #[schema(example = "John Doe")]
    pub name: String,

    /// Currently assigned tag; reassignment is handled by the directory.
    #[schema(example = "AA11")]
    pub rfid_tag: String,

    #[serde(default = "active_by_default")]
    pub is_active: bool,
}

fn active_by_default() -> bool {
    true
}
