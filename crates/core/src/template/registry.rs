//! Template registry.

use std::collections::BTreeMap;

use super::error::TemplateError;
use super::types::{JournalTemplate, LineLayout, TemplateId};
use crate::event::ExternalTransactionEvent;
use crate::ledger::AccountDirectory;

/// Named templates, validated against the chart of accounts at build time.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<TemplateId, JournalTemplate>,
}

impl TemplateRegistry {
    /// Builds a registry.
    ///
    /// # Errors
    ///
    /// Rejects duplicate names, unknown accounts, accounts in different
    /// currencies, and layouts missing the fee account they need.
    pub fn new(
        templates: Vec<JournalTemplate>,
        directory: &dyn AccountDirectory,
    ) -> Result<Self, TemplateError> {
        let mut map = BTreeMap::new();
        for template in templates {
            validate_template(&template, directory)?;
            let id = template.id.clone();
            if map.insert(id.clone(), template).is_some() {
                return Err(TemplateError::DuplicateTemplate(id));
            }
        }
        Ok(Self { templates: map })
    }

    /// Template by name.
    #[must_use]
    pub fn get(&self, id: &TemplateId) -> Option<&JournalTemplate> {
        self.templates.get(id)
    }

    /// Templates for the event's type, highest priority first, then by name.
    #[must_use]
    pub fn for_type(&self, event: &ExternalTransactionEvent) -> Vec<&JournalTemplate> {
        let mut matching: Vec<&JournalTemplate> = self
            .templates
            .values()
            .filter(|t| t.transaction_type() == event.transaction_type)
            .collect();
        matching.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        matching
    }

    /// Templates whose required fields the event satisfies, by priority.
    #[must_use]
    pub fn find_applicable_templates(&self, event: &ExternalTransactionEvent) -> Vec<&JournalTemplate> {
        self.for_type(event)
            .into_iter()
            .filter(|t| t.all_required_fields().all(|f| event.metadata.has(f)))
            .collect()
    }

    /// All templates by name.
    pub fn iter(&self) -> impl Iterator<Item = &JournalTemplate> {
        self.templates.values()
    }

    /// Number of templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns true if no template is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn validate_template(
    template: &JournalTemplate,
    directory: &dyn AccountDirectory,
) -> Result<(), TemplateError> {
    let misconfigured = |reason: String| TemplateError::Misconfigured {
        template: template.id.clone(),
        reason,
    };

    let layout = template.kind.layout();
    if layout == LineLayout::FeeOnly && !template.has_fee_line {
        return Err(misconfigured("verification templates must have a fee line".to_string()));
    }
    if (template.has_fee_line || layout == LineLayout::Return) && template.fee_account.is_none() {
        return Err(misconfigured("layout needs a fee account".to_string()));
    }

    let mut currency = None;
    for account_id in template.accounts() {
        let account = directory
            .account(account_id)
            .ok_or_else(|| misconfigured(format!("unknown account {account_id}")))?;
        match currency {
            None => currency = Some(account.currency),
            Some(c) if c != account.currency => {
                return Err(misconfigured(format!(
                    "account {account_id} is in {}, expected {c}",
                    account.currency
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
