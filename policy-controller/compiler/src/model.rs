//! Render models: typed rules flattened into the strings templates splice in.
//!
//! Every expression here is already valid program text. Constants are written
//! as JSON literals; references become paths rooted at the data-context key
//! the resolver stores them under.

use praetor_policy_core::{
    context::{self, RefRole},
    path,
};
use praetor_policy_k8s_api::{
    api::core::v1::Affinity,
    policy::{
        AffectMode, Cond, ConstantValue, OverrideRuleTemplate, OverrideTemplateType,
        PodAvailableBadge, ReplicaReference, TemplateOperation, ValidateCondition, ValueRef,
    },
    IntOrString,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

/// Why a rule cannot be rendered.
pub(crate) type Unrenderable = String;

#[derive(Debug, Serialize)]
pub(crate) struct OverrideModel {
    pub inputs: BTreeSet<String>,
    pub operation: &'static str,
    pub field: Option<&'static str>,
    pub value: Option<String>,
    pub keys: Option<String>,
    pub factors: Vec<Factor>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Factor {
    pub name: &'static str,
    pub factor: f64,
    pub milli: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ConditionModel {
    pub inputs: BTreeSet<String>,
    pub data: String,
    pub value: Option<String>,
    pub cond: &'static str,
    pub uses_list: bool,
    pub reject: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct BadgeModel {
    pub inputs: BTreeSet<String>,
    pub target: String,
    pub current: String,
    pub max_unavailable: Option<String>,
    pub min_available: Option<String>,
    pub uses_math: bool,
}

/// A replica budget: an absolute count or a percentage of the target count,
/// rounded up.
#[derive(Debug, PartialEq)]
pub(crate) enum Budget {
    Count(i64),
    Percent(i64),
}

// === override templates ===

pub(crate) fn override_model(t: &OverrideRuleTemplate) -> Result<OverrideModel, Unrenderable> {
    let mut model = OverrideModel {
        inputs: inputs(),
        operation: operation(t.operation),
        field: None,
        value: None,
        keys: None,
        factors: vec![],
    };

    match t.kind {
        OverrideTemplateType::Annotations | OverrideTemplateType::Labels => {
            model.field = Some(if t.kind == OverrideTemplateType::Labels {
                "labels"
            } else {
                "annotations"
            });
            if t.operation == TemplateOperation::Remove {
                model.keys = Some(match (&t.value_ref, &t.value) {
                    (Some(r), _) => reference(&mut model.inputs, r, RefRole::Value),
                    (None, Some(ConstantValue::StringSlice(keys))) => literal(&keys.iter().collect::<Vec<_>>()),
                    (None, Some(ConstantValue::StringMap(map))) => literal(&map.keys().collect::<Vec<_>>()),
                    _ => return Err("removal needs a stringSlice or stringMap value, or a valueRef".into()),
                });
            } else {
                model.value = Some(match (&t.value_ref, &t.value) {
                    (Some(r), _) => reference(&mut model.inputs, r, RefRole::Value),
                    (None, Some(ConstantValue::StringMap(map))) if !map.is_empty() => literal(map),
                    _ => return Err("a non-empty stringMap value or a valueRef is required".into()),
                });
            }
        }

        OverrideTemplateType::Resources => {
            if t.operation != TemplateOperation::Remove {
                model.value = Some(match (&t.value_ref, &t.resources) {
                    (Some(r), _) => reference(&mut model.inputs, r, RefRole::Value),
                    (None, Some(resources))
                        if resources.limits.is_some() || resources.requests.is_some() =>
                    {
                        literal(resources)
                    }
                    _ => return Err("resources with limits or requests, or a valueRef, is required".into()),
                });
            }
        }

        OverrideTemplateType::ResourcesOversell => {
            let factors = t
                .resources_oversell
                .as_ref()
                .map(|o| o.valid_factors())
                .unwrap_or_default();
            if factors.is_empty() {
                return Err("no oversell factor is a positive number".into());
            }
            model.factors = factors
                .into_iter()
                .map(|(name, factor)| Factor {
                    name,
                    factor,
                    milli: name == "cpu",
                })
                .collect();
        }

        OverrideTemplateType::Tolerations => {
            model.value = Some(match (&t.value_ref, &t.tolerations) {
                (Some(r), _) => reference(&mut model.inputs, r, RefRole::Value),
                (None, Some(tolerations)) if !tolerations.is_empty() => literal(tolerations),
                _ => return Err("a non-empty toleration list or a valueRef is required".into()),
            });
        }

        OverrideTemplateType::Affinity => {
            if t.operation != TemplateOperation::Remove {
                model.value = Some(match (&t.value_ref, &t.affinity) {
                    (Some(r), _) => reference(&mut model.inputs, r, RefRole::Value),
                    (None, Some(affinity)) if has_constraints(affinity) => literal(affinity),
                    _ => return Err("affinity declares no node, pod or anti-affinity term".into()),
                });
            }
        }
    }

    Ok(model)
}

/// True when at least one affinity sub-rule carries a real term.
pub(crate) fn has_constraints(affinity: &Affinity) -> bool {
    fn any<T>(terms: &Option<Vec<T>>) -> bool {
        terms.as_ref().is_some_and(|t| !t.is_empty())
    }

    let node = affinity.node_affinity.as_ref().is_some_and(|n| {
        n.required_during_scheduling_ignored_during_execution
            .as_ref()
            .is_some_and(|r| !r.node_selector_terms.is_empty())
            || any(&n.preferred_during_scheduling_ignored_during_execution)
    });
    let pod = affinity.pod_affinity.as_ref().is_some_and(|p| {
        any(&p.required_during_scheduling_ignored_during_execution)
            || any(&p.preferred_during_scheduling_ignored_during_execution)
    });
    let anti = affinity.pod_anti_affinity.as_ref().is_some_and(|p| {
        any(&p.required_during_scheduling_ignored_during_execution)
            || any(&p.preferred_during_scheduling_ignored_during_execution)
    });
    node || pod || anti
}

// === validate templates ===

pub(crate) fn condition_model(c: &ValidateCondition) -> Result<ConditionModel, Unrenderable> {
    let mut inputs = inputs();
    let data = reference(&mut inputs, &c.data_ref, RefRole::Data);

    let value = match (&c.value_ref, &c.value) {
        (Some(r), _) => Some(reference(&mut inputs, r, RefRole::Value)),
        (None, Some(v)) => Some(literal(&constant(v))),
        (None, None) => None,
    };
    if value.is_none() && !matches!(c.cond, Cond::Exist | Cond::NotExist) {
        return Err(format!("{:?} needs a value or a valueRef", c.cond));
    }

    let message = if c.message.is_empty() {
        format!("{:?} condition rejected the change", c.cond)
    } else {
        c.message.clone()
    };

    Ok(ConditionModel {
        inputs,
        data,
        value,
        cond: cond_expression(c.cond),
        uses_list: matches!(c.cond, Cond::In | Cond::NotIn),
        reject: c.affect_mode.unwrap_or_default() == AffectMode::Reject,
        message: literal(&message),
    })
}

pub(crate) fn badge_model(b: &PodAvailableBadge) -> Result<BadgeModel, Unrenderable> {
    let max_unavailable = b.max_unavailable.as_ref().map(budget).transpose()?;
    let min_available = b.min_available.as_ref().map(budget).transpose()?;
    let uses_math = [&max_unavailable, &min_available]
        .into_iter()
        .any(|b| matches!(b, Some(Budget::Percent(_))));
    if max_unavailable.is_none() && min_available.is_none() {
        return Err("one of maxUnavailable or minAvailable is required".into());
    }

    let replicas = b
        .replica_reference
        .clone()
        .unwrap_or_else(ReplicaReference::owner_default);
    let mut inputs = inputs();
    let root = reference(&mut inputs, &replicas.as_value_ref(), RefRole::Data);

    Ok(BadgeModel {
        target: path::expression(&root, &replicas.target_replica_path),
        current: path::expression(&root, &replicas.current_replica_path),
        inputs,
        max_unavailable: max_unavailable.map(|b| b.expression()),
        min_available: min_available.map(|b| b.expression()),
        uses_math,
    })
}

impl Budget {
    fn expression(&self) -> String {
        match self {
            Self::Count(n) => n.to_string(),
            Self::Percent(p) => format!("math.Ceil(_target*{p}/100)"),
        }
    }
}

fn budget(value: &IntOrString) -> Result<Budget, Unrenderable> {
    match value {
        IntOrString::Int(n) if *n >= 0 => Ok(Budget::Count(i64::from(*n))),
        IntOrString::String(s) => {
            let parsed = match s.trim().strip_suffix('%') {
                Some(pct) => pct.parse::<i64>().ok().filter(|p| (0..=100).contains(p)).map(Budget::Percent),
                None => s.trim().parse::<i64>().ok().filter(|n| *n >= 0).map(Budget::Count),
            };
            parsed.ok_or_else(|| format!("invalid availability budget {s:?}"))
        }
        IntOrString::Int(n) => Err(format!("invalid availability budget {n}")),
    }
}

fn cond_expression(cond: Cond) -> &'static str {
    match cond {
        Cond::Equal => "_data == _value",
        Cond::NotEqual => "_data != _value",
        Cond::Exist => "_data != null",
        Cond::NotExist => "_data == null",
        Cond::In => "list.Contains(_value, _data)",
        Cond::NotIn => "!list.Contains(_value, _data)",
        Cond::Gt => "_data > _value",
        Cond::Gte => "_data >= _value",
        Cond::Lt => "_data < _value",
        Cond::Lte => "_data <= _value",
    }
}

// === helpers ===

fn inputs() -> BTreeSet<String> {
    std::iter::once(context::OBJECT.to_string()).collect()
}

fn operation(op: TemplateOperation) -> &'static str {
    match op {
        TemplateOperation::Add => "add",
        TemplateOperation::Remove => "remove",
        TemplateOperation::Replace => "replace",
    }
}

/// Records the reference's context key as a program input and returns the
/// expression selecting its path.
fn reference(inputs: &mut BTreeSet<String>, r: &ValueRef, role: RefRole) -> String {
    let key = context::key_for(r.from, role);
    let expr = path::expression(&key, &r.path);
    inputs.insert(key);
    expr
}

fn literal<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_value(value)
        .unwrap_or(Value::Null)
        .to_string()
}

pub(crate) fn constant(value: &ConstantValue) -> Value {
    match value {
        ConstantValue::String(s) => Value::from(s.as_str()),
        ConstantValue::Integer(n) => Value::from(*n),
        ConstantValue::Float(f) => Value::from(*f),
        ConstantValue::Boolean(b) => Value::from(*b),
        ConstantValue::StringSlice(v) => Value::from(v.clone()),
        ConstantValue::IntegerSlice(v) => Value::from(v.clone()),
        ConstantValue::FloatSlice(v) => Value::from(v.clone()),
        ConstantValue::StringMap(m) => m
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect::<serde_json::Map<_, _>>()
            .into(),
    }
}
