//! Validation helpers for DTOs.

use std::collections::HashSet;

use validator::ValidationError;

use crate::dto::game::UpdateRosterRequest;

/// Validates that a roster names exactly one host and no member twice.
pub fn validate_roster(request: &UpdateRosterRequest) -> Result<(), ValidationError> {
    let hosts = request.members.iter().filter(|m| m.is_host).count();
    if hosts != 1 {
        let mut err = ValidationError::new("roster_host_count");
        err.message = Some(format!("Roster must have exactly one host (got {hosts})").into());
        return Err(err);
    }

    let mut seen = HashSet::new();
    if let Some(duplicate) = request
        .members
        .iter()
        .find(|member| !seen.insert(member.id.as_str()))
    {
        let mut err = ValidationError::new("roster_duplicate_member");
        err.message = Some(format!("Member `{}` is listed twice", duplicate.id).into());
        return Err(err);
    }

    Ok(())
}
