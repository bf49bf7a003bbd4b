//! Type-name → builder registries, matched case-insensitively. Callers
//! construct a registry and register builders into it explicitly (see
//! `BaseBuilder::new`'s default doctor registration); there is no global,
//! process-wide instance.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::base::BalancerBuilder;
use crate::doctor::DoctorBuilder;

/// name → `BalancerBuilder` lookup.
#[derive(Default)]
pub struct BalancerRegistry {
    builders: RwLock<HashMap<String, Arc<dyn BalancerBuilder>>>,
}

impl BalancerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, builder: Arc<dyn BalancerBuilder>) {
        self.builders
            .write()
            .unwrap()
            .insert(builder.name().to_lowercase(), builder);
    }

    pub fn unregister(&self, name: &str) {
        self.builders.write().unwrap().remove(&name.to_lowercase());
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BalancerBuilder>> {
        self.builders.read().unwrap().get(&name.to_lowercase()).cloned()
    }
}

/// name → `DoctorBuilder` lookup.
#[derive(Default)]
pub struct DoctorRegistry {
    builders: RwLock<HashMap<String, Arc<dyn DoctorBuilder>>>,
}

impl DoctorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, builder: Arc<dyn DoctorBuilder>) {
        self.builders
            .write()
            .unwrap()
            .insert(builder.name().to_lowercase(), builder);
    }

    pub fn unregister(&self, name: &str) {
        self.builders.write().unwrap().remove(&name.to_lowercase());
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DoctorBuilder>> {
        self.builders.read().unwrap().get(&name.to_lowercase()).cloned()
    }
}
