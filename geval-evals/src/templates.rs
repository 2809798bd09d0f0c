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

//! Prompt templates for G-Eval and test case content extraction

use geval_core::{EvaluationParam, Rubric, TestCase};

/// Test case fields rendered for a prompt, in configured order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestCaseContent(Vec<(EvaluationParam, String)>);

impl TestCaseContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, param: EvaluationParam, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter_mut().find(|(p, _)| *p == param) {
            Some(entry) => entry.1 = value,
            None => self.0.push((param, value)),
        }
    }

    pub fn get(&self, param: EvaluationParam) -> Option<&str> {
        self.0
            .iter()
            .find(|(p, _)| *p == param)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (EvaluationParam, &str)> {
        self.0.iter().map(|(p, v)| (*p, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Extract the configured fields of a test case.
///
/// Lists are newline-joined. Absent fields are skipped, and `None` yields an
/// empty mapping; presence is checked by the caller.
pub fn extract_test_case_content(
    test_case: Option<&TestCase>,
    evaluation_params: &[EvaluationParam],
) -> TestCaseContent {
    let mut content = TestCaseContent::new();

    let Some(test_case) = test_case else {
        return content;
    };

    for &param in evaluation_params {
        if let Some(value) = test_case.field(param) {
            content.insert(param, value.render());
        }
    }

    content
}

/// Prompt asking the model to derive evaluation steps
pub fn generate_evaluation_steps_prompt(
    evaluation_params: &[EvaluationParam],
    criteria: Option<&str>,
) -> String {
    let params_text = evaluation_params
        .iter()
        .map(EvaluationParam::as_str)
        .collect::<Vec<_>>()
        .join(", ");

    let criteria_text = criteria
        .map(|c| format!("\n\n**Criteria:**\n{}", c))
        .unwrap_or_default();

    format!(
        r#"Given the following evaluation parameters: {params}{criteria}

Generate 3-4 concise evaluation steps to evaluate these parameters.
The steps should clearly explain how to assess the quality and relationships between these parameters.

Output your response in the following JSON format:
{{
  "steps": [
    "Step 1 description",
    "Step 2 description",
    "Step 3 description"
  ]
}}"#,
        params = params_text,
        criteria = criteria_text
    )
}

/// Prompt asking the model to grade a test case
pub fn generate_evaluation_prompt(
    evaluation_steps: &[String],
    content: &TestCaseContent,
    strict_mode: bool,
    rubric: Option<&[Rubric]>,
) -> String {
    let steps_text = evaluation_steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step))
        .collect::<Vec<_>>()
        .join("\n");

    let content_text = content
        .iter()
        .map(|(param, value)| format!("**{}:**\n{}", param.display_name(), value))
        .collect::<Vec<_>>()
        .join("\n\n");

    let rubric_text = match rubric {
        Some(rubric) if !rubric.is_empty() => {
            let lines = rubric
                .iter()
                .map(|r| format!("- Score {}: {}", r.score, r.description))
                .collect::<Vec<_>>()
                .join("\n");
            format!("\n\n**Scoring Rubric:**\n{}", lines)
        }
        _ => String::new(),
    };

    let scoring_instructions = if strict_mode {
        "Give a binary score of either 0 (fail) or 1 (pass)."
    } else {
        "Provide a score from 0 to 10, where 0 is the worst and 10 is the best."
    };

    format!(
        r#"You will be given evaluation steps, inputs, and outputs to evaluate.

**Evaluation Steps:**
{steps}

**Test Case:**
{content}{rubric}

Based on the evaluation steps and test case, evaluate the quality.
{instructions}

Provide your evaluation in the following JSON format:
{{
  "score": <number>,
  "reason": "<detailed explanation of your evaluation>"
}}"#,
        steps = steps_text,
        content = content_text,
        rubric = rubric_text,
        instructions = scoring_instructions
    )
}

/// camelCase -> Title Case ("retrievalContext" -> "Retrieval Context")
pub fn format_param_name(param: &str) -> String {
    let mut out = String::with_capacity(param.len() + 4);
    for (i, ch) in param.chars().enumerate() {
        if i == 0 {
            out.extend(ch.to_uppercase());
        } else if ch.is_uppercase() {
            out.push(' ');
            out.push(ch);
        } else {
            out.push(ch);
        }
    }
    out
}
