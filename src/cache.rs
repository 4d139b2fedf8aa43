use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use log::{debug, trace};
use miette::Error;

use crate::{CompiledFunction, compile_formula};

type Slot = Arc<Mutex<Option<Arc<CompiledFunction>>>>;

/// Compiled functions keyed by formula text.
///
/// Each formula has its own slot, so two callers asking for the same formula
/// wait for a single compile while different formulas compile in parallel.
/// Failed compiles leave the slot empty and are retried by the next caller.
/// Nothing is ever evicted.
#[derive(Debug, Default)]
pub struct FormulaCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl FormulaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(&self, formula: &str) -> Result<Arc<CompiledFunction>, Error> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(formula.to_string()).or_default())
        };

        let mut compiled = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(function) = compiled.as_ref() {
            trace!("cache hit for `{formula}`");
            return Ok(Arc::clone(function));
        }

        debug!("compiling `{formula}`");
        let function = Arc::new(compile_formula(formula)?);
        *compiled = Some(Arc::clone(&function));
        Ok(function)
    }

    pub fn contains(&self, formula: &str) -> bool {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(formula).is_some_and(|slot| {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
        })
    }

    /// Number of formulas compiled so far.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .values()
            .filter(|slot| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .is_some()
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
