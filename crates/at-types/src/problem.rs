//! Tuning problem definition: spaces, objectives and feasibility constraints.

use std::fmt;
use std::sync::Arc;

use crate::errors::TuneResult;
use crate::space::{Assignment, Space};
use crate::config_error;

/// Feasibility predicate over named dimension values.
pub type Predicate = dyn Fn(&Assignment) -> bool + Send + Sync;

/// A named feasibility constraint.
#[derive(Clone)]
pub struct Constraint {
    pub name: String,
    predicate: Arc<Predicate>,
}

impl Constraint {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&Assignment) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn check(&self, assignment: &Assignment) -> bool {
        (self.predicate)(assignment)
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constraint").field("name", &self.name).finish()
    }
}

/// The tuning problem: Input Space (tasks), Parameter Space and the objectives.
///
/// Task constraints see only task dimensions. Parameter constraints see the
/// task dimensions merged with the parameter dimensions.
#[derive(Debug, Clone)]
pub struct TuningProblem {
    pub input_space: Space,
    pub parameter_space: Space,
    pub objectives: Vec<String>,
    task_constraints: Vec<Constraint>,
    parameter_constraints: Vec<Constraint>,
}

impl TuningProblem {
    pub fn new(input_space: Space, parameter_space: Space) -> Self {
        Self {
            input_space,
            parameter_space,
            objectives: vec!["objective".to_string()],
            task_constraints: Vec::new(),
            parameter_constraints: Vec::new(),
        }
    }

    pub fn with_objectives<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.objectives = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_task_constraint(
        mut self,
        name: impl Into<String>,
        predicate: impl Fn(&Assignment) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.task_constraints.push(Constraint::new(name, predicate));
        self
    }

    pub fn with_parameter_constraint(
        mut self,
        name: impl Into<String>,
        predicate: impl Fn(&Assignment) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.parameter_constraints.push(Constraint::new(name, predicate));
        self
    }

    /// Dimensionality of the Input Space.
    pub fn di(&self) -> usize {
        self.input_space.len()
    }

    /// Dimensionality of the Parameter Space.
    pub fn dp(&self) -> usize {
        self.parameter_space.len()
    }

    pub fn validate(&self) -> TuneResult<()> {
        if self.parameter_space.is_empty() {
            return Err(config_error!("Parameter space has no dimensions"));
        }
        if self.objectives.is_empty() {
            return Err(config_error!("Problem declares no objectives"));
        }
        self.input_space.validate()?;
        self.parameter_space.validate()?;

        let clash = self
            .parameter_space
            .iter()
            .find(|p| self.input_space.iter().any(|t| t.name == p.name));
        if let Some(dim) = clash {
            return Err(config_error!(
                "Dimension name {} is declared in both the input and parameter spaces",
                dim.name
            ));
        }
        Ok(())
    }

    /// Task-level predicate, or `None` when no task constraints are declared.
    pub fn task_predicate(&self) -> Option<Box<Predicate>> {
        combine(&self.task_constraints)
    }

    /// Parameter-level predicate, or `None` when no parameter constraints are declared.
    pub fn parameter_predicate(&self) -> Option<Box<Predicate>> {
        combine(&self.parameter_constraints)
    }
}

fn combine(constraints: &[Constraint]) -> Option<Box<Predicate>> {
    if constraints.is_empty() {
        return None;
    }
    let constraints = constraints.to_vec();
    Some(Box::new(move |assignment: &Assignment| {
        constraints.iter().all(|c| c.check(assignment))
    }))
}
