use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::rule::Rule;
use crate::spec::computed::ComputedField;
use crate::spec::transition::StepTransition;

const DEFINITIONS_PREFIX: &str = "#/definitions/";

/// A single input on a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(
        default,
        alias = "visibleWhen",
        skip_serializing_if = "Option::is_none"
    )]
    pub visible_when: Option<Rule>,
}

/// A field declared inline or borrowed from the schema's `definitions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FieldEntry {
    Ref {
        #[serde(rename = "$ref")]
        reference: String,
    },
    Inline(FieldSpec),
}

/// One page of a multi-step form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FormStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        alias = "visibleWhen",
        skip_serializing_if = "Option::is_none"
    )]
    pub visible_when: Option<Rule>,
    #[serde(default, alias = "fieldSchema", skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldEntry>,
}

/// Top-level form flow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FormSchema {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub steps: Vec<FormStep>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<StepTransition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub computed: Vec<ComputedField>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub definitions: BTreeMap<String, FieldSpec>,
    /// Step treated as the terminal review page. Falls back to the engine
    /// configuration when absent.
    #[serde(
        default,
        alias = "reviewStep",
        skip_serializing_if = "Option::is_none"
    )]
    pub review_step: Option<String>,
}

impl FormSchema {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// First step with the given id. Duplicate ids are not rejected here.
    pub fn step(&self, id: &str) -> Option<&FormStep> {
        self.steps.iter().find(|step| step.id == id)
    }

    pub fn first_step(&self) -> Option<&FormStep> {
        self.steps.first()
    }

    pub fn transitions_from<'a, 'b>(
        &'a self,
        from: &'b str,
    ) -> impl Iterator<Item = &'a StepTransition> + use<'a, 'b> {
        self.transitions
            .iter()
            .filter(move |transition| transition.from == from)
    }

    /// Resolves a field entry, following `$ref` into `definitions`.
    pub fn resolve_field<'a>(&'a self, entry: &'a FieldEntry) -> Result<&'a FieldSpec, FlowError> {
        match entry {
            FieldEntry::Inline(field) => Ok(field),
            FieldEntry::Ref { reference } => reference
                .strip_prefix(DEFINITIONS_PREFIX)
                .and_then(|name| self.definitions.get(name))
                .ok_or_else(|| FlowError::UnresolvedRef(reference.clone())),
        }
    }
}
