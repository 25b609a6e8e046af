use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::policy::config::{ExprDefinition, RuleDefinition};
use crate::policy::engine::PolicyCompileError;
use crate::policy::path::FieldPath;

/// Compiled regex size cap; patterns beyond it are rejected at load time
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Operators supported for field comparisons
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Field must be present and non-null
    #[serde(alias = "required")]
    Exists,
    /// Field is missing or null
    Absent,
    /// Field equals value
    Eq,
    /// Field not equals value
    Neq,
    /// Field less than value
    Lt,
    /// Field less than or equal to value
    Lte,
    /// Field greater than value
    Gt,
    /// Field greater than or equal to value
    Gte,
    /// Field contains value (string or array)
    Contains,
    /// Field matches regex pattern
    Matches,
    /// Field equals one of the listed values
    In,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Exists => "exists",
            Operator::Absent => "absent",
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Contains => "contains",
            Operator::Matches => "matches",
            Operator::In => "in",
        }
    }
}

/// Right-hand side of a comparison, checked and prepared at compile time
#[derive(Debug, Clone)]
enum Operand {
    None,
    Literal(Value),
    Number(f64),
    Pattern(Regex),
    Candidates(Vec<Value>),
}

/// A single field comparison
#[derive(Debug, Clone)]
pub struct Comparison {
    pub path: FieldPath,
    pub operator: Operator,
    operand: Operand,
}

impl Comparison {
    fn compile(
        field: &str,
        operator: Operator,
        value: Option<&Value>,
    ) -> Result<Self, PolicyCompileError> {
        let path = FieldPath::parse(field)?;
        let invalid = |reason: String| PolicyCompileError::InvalidConfig(format!(
            "field '{}': operator '{}' {}",
            field,
            operator.as_str(),
            reason
        ));

        let operand = match (operator, value) {
            (Operator::Exists | Operator::Absent, None) => Operand::None,
            (Operator::Exists | Operator::Absent, Some(_)) => {
                return Err(invalid("takes no value".to_string()))
            }
            (_, None) => return Err(invalid("requires a value".to_string())),
            // Null fields read as absent; use exists/absent instead
            (Operator::Eq | Operator::Neq | Operator::Contains, Some(Value::Null)) => {
                return Err(invalid("cannot compare against null".to_string()))
            }
            (Operator::Eq | Operator::Neq | Operator::Contains, Some(v)) => {
                Operand::Literal(v.clone())
            }
            (Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte, Some(v)) => {
                match v.as_f64() {
                    Some(n) => Operand::Number(n),
                    None => return Err(invalid("requires a numeric value".to_string())),
                }
            }
            (Operator::Matches, Some(Value::String(pattern))) => {
                let regex = RegexBuilder::new(pattern)
                    .size_limit(REGEX_SIZE_LIMIT)
                    .build()
                    .map_err(|source| PolicyCompileError::InvalidRegex {
                        pattern: pattern.clone(),
                        source,
                    })?;
                Operand::Pattern(regex)
            }
            (Operator::Matches, Some(_)) => {
                return Err(invalid("requires a string pattern".to_string()))
            }
            (Operator::In, Some(Value::Array(candidates))) => {
                Operand::Candidates(candidates.clone())
            }
            (Operator::In, Some(_)) => return Err(invalid("requires a list of values".to_string())),
        };

        Ok(Self {
            path,
            operator,
            operand,
        })
    }

    /// Test a resolved field value. An absent field is never an error.
    pub fn test(&self, field_value: Option<&Value>) -> bool {
        let present = field_value.filter(|v| !v.is_null());

        match (&self.operator, &self.operand) {
            (Operator::Exists, _) => present.is_some(),
            (Operator::Absent, _) => present.is_none(),
            (Operator::Eq, Operand::Literal(expected)) => present == Some(expected),
            (Operator::Neq, Operand::Literal(expected)) => present != Some(expected),
            (Operator::Lt, Operand::Number(rv)) => compare_numbers(present, |fv| fv < *rv),
            (Operator::Lte, Operand::Number(rv)) => compare_numbers(present, |fv| fv <= *rv),
            (Operator::Gt, Operand::Number(rv)) => compare_numbers(present, |fv| fv > *rv),
            (Operator::Gte, Operand::Number(rv)) => compare_numbers(present, |fv| fv >= *rv),
            (Operator::Contains, Operand::Literal(needle)) => check_contains(present, needle),
            (Operator::Matches, Operand::Pattern(regex)) => match present {
                Some(Value::String(s)) => regex.is_match(s),
                _ => false,
            },
            (Operator::In, Operand::Candidates(candidates)) => {
                present.map_or(false, |v| candidates.contains(v))
            }
            _ => false,
        }
    }
}

/// Compare numeric values using the provided comparator
fn compare_numbers<F>(field_value: Option<&Value>, comparator: F) -> bool
where
    F: Fn(f64) -> bool,
{
    match field_value {
        Some(Value::Number(fv)) => fv.as_f64().map_or(false, comparator),
        _ => false,
    }
}

/// Check if field contains the rule value
fn check_contains(field_value: Option<&Value>, needle: &Value) -> bool {
    match (field_value, needle) {
        // String contains substring
        (Some(Value::String(haystack)), Value::String(search)) => haystack.contains(search.as_str()),
        // Array contains value
        (Some(Value::Array(items)), search) => items.contains(search),
        // Object has key
        (Some(Value::Object(map)), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

/// Compiled predicate expression
#[derive(Debug, Clone)]
pub enum Expr {
    All(Vec<Expr>),
    Any(Vec<Expr>),
    Not(Box<Expr>),
    Compare(Comparison),
    Some { path: FieldPath, predicate: Box<Expr> },
    Every { path: FieldPath, predicate: Box<Expr> },
}

impl Expr {
    /// Compile a source expression, requiring exactly one form per node
    pub fn compile(def: &ExprDefinition) -> Result<Self, PolicyCompileError> {
        let forms = [
            def.all.is_some(),
            def.any.is_some(),
            def.not.is_some(),
            def.field.is_some(),
            def.some.is_some(),
            def.every.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count();

        if forms != 1 {
            return Err(PolicyCompileError::InvalidConfig(format!(
                "expression must have exactly one of all/any/not/field/some/every, found {}",
                forms
            )));
        }

        if def.field.is_none() && (def.operator.is_some() || def.value.is_some()) {
            return Err(PolicyCompileError::InvalidConfig(
                "'operator' and 'value' are only valid on a field comparison".to_string(),
            ));
        }
        if def.some.is_none() && def.every.is_none() && def.condition.is_some() {
            return Err(PolicyCompileError::InvalidConfig(
                "'where' is only valid on some/every".to_string(),
            ));
        }

        if let Some(children) = &def.all {
            return Ok(Expr::All(compile_all(children)?));
        }
        if let Some(children) = &def.any {
            return Ok(Expr::Any(compile_all(children)?));
        }
        if let Some(inner) = &def.not {
            return Ok(Expr::Not(Box::new(Expr::compile(inner)?)));
        }
        if let Some(field) = &def.field {
            let operator = def.operator.ok_or_else(|| {
                PolicyCompileError::InvalidConfig(format!("field '{}' has no operator", field))
            })?;
            return Ok(Expr::Compare(Comparison::compile(
                field,
                operator,
                def.value.as_ref(),
            )?));
        }

        let (path, universal) = match (&def.some, &def.every) {
            (Some(path), _) => (path, false),
            (None, Some(path)) => (path, true),
            (None, None) => {
                return Err(PolicyCompileError::InvalidConfig(
                    "expression has no recognized form".to_string(),
                ))
            }
        };
        let condition = def.condition.as_ref().ok_or_else(|| {
            PolicyCompileError::InvalidConfig(format!("quantifier over '{}' has no 'where'", path))
        })?;
        let path = FieldPath::parse(path)?;
        let predicate = Box::new(Expr::compile(condition)?);

        Ok(if universal {
            Expr::Every { path, predicate }
        } else {
            Expr::Some { path, predicate }
        })
    }
}

fn compile_all(children: &[ExprDefinition]) -> Result<Vec<Expr>, PolicyCompileError> {
    children.iter().map(Expr::compile).collect()
}

/// Piece of a message template
#[derive(Debug, Clone)]
pub enum TemplatePart {
    Literal(String),
    Field(FieldPath),
}

/// Violation message with `{{ path }}` placeholders
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    parts: Vec<TemplatePart>,
}

impl MessageTemplate {
    pub fn parse(template: &str) -> Result<Self, PolicyCompileError> {
        if template.trim().is_empty() {
            return Err(PolicyCompileError::InvalidConfig(
                "rule message must not be empty".to_string(),
            ));
        }

        let mut parts = Vec::new();
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                return Err(PolicyCompileError::InvalidConfig(format!(
                    "unterminated placeholder in message '{}'",
                    template
                )));
            };
            if start > 0 {
                parts.push(TemplatePart::Literal(rest[..start].to_string()));
            }
            let inner = &rest[start + 2..start + 2 + len];
            parts.push(TemplatePart::Field(FieldPath::parse(inner)?));
            rest = &rest[start + 2 + len + 2..];
        }
        if !rest.is_empty() {
            parts.push(TemplatePart::Literal(rest.to_string()));
        }

        Ok(Self { parts })
    }

    pub fn parts(&self) -> &[TemplatePart] {
        &self.parts
    }
}

/// A compiled rule
#[derive(Debug, Clone)]
pub struct Rule {
    pub message: MessageTemplate,
    pub foreach: Option<FieldPath>,
    pub when: Expr,
}

impl Rule {
    pub fn compile(def: &RuleDefinition) -> Result<Self, PolicyCompileError> {
        Ok(Self {
            message: MessageTemplate::parse(&def.message)?,
            foreach: def.foreach.as_deref().map(FieldPath::parse).transpose()?,
            when: Expr::compile(&def.when)?,
        })
    }

    /// Every field path referenced by this rule, in no particular order
    pub fn paths(&self) -> Vec<&FieldPath> {
        let mut paths: Vec<&FieldPath> = self.foreach.iter().collect();
        paths.extend(self.message.parts().iter().filter_map(|part| match part {
            TemplatePart::Field(path) => Some(path),
            TemplatePart::Literal(_) => None,
        }));

        let mut pending = vec![&self.when];
        while let Some(expr) = pending.pop() {
            match expr {
                Expr::All(children) | Expr::Any(children) => pending.extend(children.iter()),
                Expr::Not(inner) => pending.push(inner.as_ref()),
                Expr::Compare(cmp) => paths.push(&cmp.path),
                Expr::Some { path, predicate } | Expr::Every { path, predicate } => {
                    paths.push(path);
                    pending.push(predicate.as_ref());
                }
            }
        }
        paths
    }
}
