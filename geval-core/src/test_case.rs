// Copyright 2025 GEval Contributors (https://github.com/geval-rs/geval)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Test cases and the parameters that select which of their fields get graded.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A single unit of evaluation: an input/output pair plus optional grounding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Input given to the system under test
    pub input: String,

    /// Output the system actually produced
    pub actual_output: String,

    /// Reference answer, if one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,

    /// Ground-truth context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<String>>,

    /// Context retrieved at runtime (RAG)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_context: Option<Vec<String>>,

    /// Names of tools invoked while producing the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_called: Option<Vec<String>>,

    /// Free-form metadata, never shown to the grading model
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Dataset tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
}

impl TestCase {
    pub fn new(input: impl Into<String>, actual_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            actual_output: actual_output.into(),
            ..Default::default()
        }
    }

    pub fn with_expected_output(mut self, expected_output: impl Into<String>) -> Self {
        self.expected_output = Some(expected_output.into());
        self
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_retrieval_context(mut self, retrieval_context: Vec<String>) -> Self {
        self.retrieval_context = Some(retrieval_context);
        self
    }

    pub fn with_tools_called(mut self, tools_called: Vec<String>) -> Self {
        self.tools_called = Some(tools_called);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }

    /// Look up the field selected by `param`. `None` means the field is absent.
    pub fn field(&self, param: EvaluationParam) -> Option<FieldValue<'_>> {
        match param {
            EvaluationParam::Input => Some(FieldValue::Text(&self.input)),
            EvaluationParam::ActualOutput => Some(FieldValue::Text(&self.actual_output)),
            EvaluationParam::ExpectedOutput => {
                self.expected_output.as_deref().map(FieldValue::Text)
            }
            EvaluationParam::Context => self.context.as_deref().map(FieldValue::List),
            EvaluationParam::RetrievalContext => {
                self.retrieval_context.as_deref().map(FieldValue::List)
            }
            EvaluationParam::ToolsCalled => self.tools_called.as_deref().map(FieldValue::List),
        }
    }

    /// Whether the field selected by `param` is present
    pub fn has(&self, param: EvaluationParam) -> bool {
        self.field(param).is_some()
    }
}

/// Borrowed view of a test case field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    List(&'a [String]),
}

impl FieldValue<'_> {
    /// Render for a prompt: lists are newline-joined
    pub fn render(&self) -> String {
        match self {
            FieldValue::Text(text) => (*text).to_string(),
            FieldValue::List(items) => items.join("\n"),
        }
    }
}

/// Test case fields that can participate in grading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EvaluationParam {
    Input,
    ActualOutput,
    ExpectedOutput,
    Context,
    RetrievalContext,
    ToolsCalled,
}

impl EvaluationParam {
    pub const ALL: [EvaluationParam; 6] = [
        EvaluationParam::Input,
        EvaluationParam::ActualOutput,
        EvaluationParam::ExpectedOutput,
        EvaluationParam::Context,
        EvaluationParam::RetrievalContext,
        EvaluationParam::ToolsCalled,
    ];

    /// camelCase name, as used in config files and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationParam::Input => "input",
            EvaluationParam::ActualOutput => "actualOutput",
            EvaluationParam::ExpectedOutput => "expectedOutput",
            EvaluationParam::Context => "context",
            EvaluationParam::RetrievalContext => "retrievalContext",
            EvaluationParam::ToolsCalled => "toolsCalled",
        }
    }

    /// Label shown in prompts
    pub fn display_name(&self) -> &'static str {
        match self {
            EvaluationParam::Input => "Input",
            EvaluationParam::ActualOutput => "Actual Output",
            EvaluationParam::ExpectedOutput => "Expected Output",
            EvaluationParam::Context => "Context",
            EvaluationParam::RetrievalContext => "Retrieval Context",
            EvaluationParam::ToolsCalled => "Tools Called",
        }
    }
}

impl fmt::Display for EvaluationParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
