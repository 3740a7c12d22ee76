//! Platform assembly
//!
//! Wires the settings store, KYC directory, clock and [`IncomeEngine`] into one
//! [`Platform`] shared by the scheduler task and the HTTP layer.

use income_engine::{IncomeEngine, PlanTerms};
use std::fmt;
use std::sync::Arc;
use tierfolio_core::{Clock, InMemoryKycDirectory, PlatformSettings, SettingsStore, SystemClock};

/// Running engine plus the collaborators the process feeds directly
#[derive(Clone)]
pub struct Platform {
    /// Income and ledger engine
    pub engine: Arc<IncomeEngine>,
    /// KYC statuses pushed by the identity service
    pub kyc: Arc<InMemoryKycDirectory>,
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Platform {
    /// Create a new builder
    pub fn builder() -> PlatformBuilder {
        PlatformBuilder {
            settings: PlatformSettings::default(),
            plans: Vec::new(),
            clock: None,
            kyc: None,
        }
    }

    pub fn engine(&self) -> &Arc<IncomeEngine> {
        &self.engine
    }
}

/// Builder for [`Platform`]
pub struct PlatformBuilder {
    settings: PlatformSettings,
    plans: Vec<PlanTerms>,
    clock: Option<Arc<dyn Clock>>,
    kyc: Option<Arc<InMemoryKycDirectory>>,
}

impl PlatformBuilder {
    /// Initial admin settings
    pub fn settings(mut self, settings: PlatformSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Plans to create in the catalog
    pub fn plans(mut self, plans: Vec<PlanTerms>) -> Self {
        self.plans = plans;
        self
    }

    /// Time source; the wall clock when unset
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn kyc(mut self, kyc: Arc<InMemoryKycDirectory>) -> Self {
        self.kyc = Some(kyc);
        self
    }

    /// Build the platform, publishing the settings and seeding the catalog
    pub fn build(self) -> anyhow::Result<Platform> {
        let settings = Arc::new(SettingsStore::new(self.settings)?);
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let kyc = self.kyc.unwrap_or_default();

        let engine = Arc::new(IncomeEngine::new(settings, kyc.clone(), clock));
        for terms in self.plans {
            let plan = engine.create_plan(terms)?;
            tracing::info!(plan_id = %plan.id, name = %plan.name, "Seeded plan");
        }

        Ok(Platform { engine, kyc })
    }
}
