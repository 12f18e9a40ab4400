// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Quota Reconciler
//!
//! Applies per-account soft/hard limits. Quotas are a hardening layer, not
//! a requirement for service: when the facility is unavailable the pass
//! warns once and carries on without them.

use crate::domain::identity::IdentityStore;
use crate::domain::policy::{AccountPlan, QuotaPlan};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QuotaReport {
    pub applied: usize,
    pub rejected: Vec<String>,
    pub failed: Vec<String>,
    /// Set when limits were declared but the facility is missing
    pub unavailable: bool,
}

pub struct QuotaReconciler {
    store: Arc<dyn IdentityStore>,
}

impl QuotaReconciler {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Apply limits for provisioned accounts
    pub async fn apply(&self, plans: &[&AccountPlan]) -> QuotaReport {
        let mut report = QuotaReport::default();

        for plan in plans {
            if let QuotaPlan::Rejected(violation) = &plan.quota {
                warn!(
                    owner = %plan.owner,
                    account = %plan.name,
                    rule = violation.rule(),
                    "quota not applied: {}", violation
                );
                report.rejected.push(plan.name.clone());
            }
        }

        let wanted: Vec<&AccountPlan> = plans
            .iter()
            .copied()
            .filter(|p| matches!(p.quota, QuotaPlan::Apply(_)))
            .collect();
        if wanted.is_empty() {
            return report;
        }

        if !self.store.quota_available().await {
            warn!(accounts = wanted.len(), "disk quotas unavailable, skipping quota application for this pass");
            report.unavailable = true;
            return report;
        }

        for plan in wanted {
            let QuotaPlan::Apply(limits) = &plan.quota else {
                continue;
            };
            match self.store.set_quota(&plan.name, limits).await {
                Ok(()) => {
                    report.applied += 1;
                    info!(
                        owner = %plan.owner,
                        account = %plan.name,
                        soft_mb = limits.soft_mb,
                        hard_mb = limits.hard_mb,
                        "quota applied"
                    );
                }
                Err(e) => {
                    warn!(owner = %plan.owner, account = %plan.name, error = %e, "quota application failed");
                    report.failed.push(plan.name.clone());
                }
            }
        }

        report
    }
}
