//! Lead/validator role assignment.
//!
//! Every constructor ends in [`RoleAssignment::new`], which enforces that the
//! lead never validates its own work and that at least one validator remains.

use super::ToolId;
use crate::errors::RoleError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub lead: ToolId,
    pub validators: Vec<ToolId>,
}

impl RoleAssignment {
    /// Build an assignment, rejecting any that break the role invariants.
    pub fn new(lead: ToolId, validators: Vec<ToolId>) -> Result<Self, RoleError> {
        let mut deduped: Vec<ToolId> = Vec::with_capacity(validators.len());
        for v in validators {
            if !deduped.contains(&v) {
                deduped.push(v);
            }
        }
        if deduped.contains(&lead) {
            return Err(RoleError::LeadIsValidator { lead });
        }
        if deduped.is_empty() {
            return Err(RoleError::NoValidators);
        }
        Ok(Self {
            lead,
            validators: deduped,
        })
    }

    /// Roles from explicit choices, filling gaps from `available`.
    ///
    /// With no lead given, the first available tool not chosen as a validator
    /// leads. With no validators given, every other available tool validates.
    pub fn select(
        available: &[ToolId],
        lead: Option<ToolId>,
        validators: &[ToolId],
    ) -> Result<Self, RoleError> {
        for tool in lead.iter().chain(validators) {
            if !available.contains(tool) {
                return Err(RoleError::Unavailable { tool: *tool });
            }
        }
        let lead = match lead {
            Some(lead) => lead,
            None => available
                .iter()
                .copied()
                .find(|t| !validators.contains(t))
                .ok_or(RoleError::NoValidators)?,
        };
        let validators = if validators.is_empty() {
            available.iter().copied().filter(|t| *t != lead).collect()
        } else {
            validators.to_vec()
        };
        Self::new(lead, validators)
    }

    /// Hand the lead role to `new_lead`; validators are re-derived from `available`.
    pub fn reassign_lead(&self, new_lead: ToolId, available: &[ToolId]) -> Result<Self, RoleError> {
        if !available.contains(&new_lead) {
            return Err(RoleError::Unavailable { tool: new_lead });
        }
        let validators = available
            .iter()
            .copied()
            .filter(|t| *t != new_lead)
            .collect();
        Self::new(new_lead, validators)
    }

    /// These roles limited to the tools in `available`.
    ///
    /// Validators that disappeared are dropped. When the lead is gone, or no
    /// validator is left, roles are re-derived from `available`.
    pub fn restrict_to(&self, available: &[ToolId]) -> Result<Self, RoleError> {
        if !available.contains(&self.lead) {
            let next = *available.first().ok_or(RoleError::Unavailable { tool: self.lead })?;
            return self.reassign_lead(next, available);
        }
        let kept: Vec<ToolId> = self
            .validators
            .iter()
            .copied()
            .filter(|v| available.contains(v))
            .collect();
        if kept.is_empty() {
            return self.reassign_lead(self.lead, available);
        }
        Self::new(self.lead, kept)
    }

    /// Lead fallback order: the current lead, then every other available tool.
    pub fn fallback_chain(&self, available: &[ToolId]) -> Vec<ToolId> {
        let mut chain = vec![self.lead];
        chain.extend(available.iter().copied().filter(|t| *t != self.lead));
        chain
    }
}
