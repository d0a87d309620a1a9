//! Environment
//!
//! Global declarations: definitions (with values, unfoldable during
//! reduction when reducible) and axioms.

use crate::expr::Expr;
use crate::level::Level;
use crate::name::Name;
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("constant '{0}' is already declared")]
    AlreadyDeclared(Name),
}

/// Information about a declared constant
#[derive(Clone, Debug)]
pub struct ConstantInfo {
    pub name: Name,
    pub level_params: Vec<Name>,
    pub type_: Expr,
    pub value: Option<Expr>,
    pub is_reducible: bool,
}

/// Declaration to add to an environment
#[derive(Clone, Debug)]
pub enum Declaration {
    Definition {
        name: Name,
        level_params: Vec<Name>,
        type_: Expr,
        value: Expr,
        is_reducible: bool,
    },
    Axiom {
        name: Name,
        level_params: Vec<Name>,
        type_: Expr,
    },
}

/// Global environment
#[derive(Clone, Debug, Default)]
pub struct Environment {
    consts: FxHashMap<Name, ConstantInfo>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_decl(&mut self, decl: Declaration) -> Result<(), EnvError> {
        let info = match decl {
            Declaration::Definition {
                name,
                level_params,
                type_,
                value,
                is_reducible,
            } => ConstantInfo {
                name,
                level_params,
                type_,
                value: Some(value),
                is_reducible,
            },
            Declaration::Axiom {
                name,
                level_params,
                type_,
            } => ConstantInfo {
                name,
                level_params,
                type_,
                value: None,
                is_reducible: false,
            },
        };
        if self.consts.contains_key(&info.name) {
            return Err(EnvError::AlreadyDeclared(info.name));
        }
        self.consts.insert(info.name.clone(), info);
        Ok(())
    }

    pub fn get_const(&self, name: &Name) -> Option<&ConstantInfo> {
        self.consts.get(name)
    }

    /// Type of the constant with its universe parameters instantiated
    pub fn instantiate_type(&self, name: &Name, levels: &[Level]) -> Option<Expr> {
        let info = self.consts.get(name)?;
        if info.level_params.len() != levels.len() {
            return None;
        }
        Some(instantiate_params(&info.type_, &info.level_params, levels))
    }

    /// Value of a reducible definition with universe parameters instantiated
    pub fn unfold(&self, name: &Name, levels: &[Level]) -> Option<Expr> {
        let info = self.consts.get(name)?;
        if !info.is_reducible || info.level_params.len() != levels.len() {
            return None;
        }
        let value = info.value.as_ref()?;
        Some(instantiate_params(value, &info.level_params, levels))
    }
}

fn instantiate_params(e: &Expr, params: &[Name], levels: &[Level]) -> Expr {
    if params.is_empty() {
        return e.clone();
    }
    let subst: Vec<(Name, Level)> = params.iter().cloned().zip(levels.iter().cloned()).collect();
    e.instantiate_level_params(&subst)
}
