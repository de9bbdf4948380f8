/// Conditional evaluation over the current responses.
///
/// A condition whose prompt has not been answered is `false`: conditional
/// content stays hidden until its dependency is known.
use crate::schema::block::{Condition, Operator, VariableBlock};
use crate::schema::response::{ResponseMap, ResponseValue};

use super::variable::substitute;

pub fn evaluate(condition: &Condition, responses: &ResponseMap) -> bool {
    let Some(answer) = responses.get(&condition.prompt_id) else {
        return false;
    };
    let expected = &condition.value;

    match condition.operator {
        Operator::Equals => loosely_equal(answer, expected),
        Operator::NotEquals => !loosely_equal(answer, expected),
        Operator::GreaterThan => compare(answer, expected, |a, b| a > b),
        Operator::LessThan => compare(answer, expected, |a, b| a < b),
        Operator::Contains => contains(answer, expected),
        Operator::InRange => match (answer.as_number(), expected.range_bounds()) {
            (Some(n), Some((lo, hi))) => n >= lo && n <= hi,
            _ => false,
        },
    }
}

/// Expand a variable block's text against the responses.
pub fn render_variable(block: &VariableBlock, responses: &ResponseMap) -> String {
    substitute(&block.template, &block.variables, responses)
}

// Strict by type, except that whole-number values match regardless of
// whether they arrived as numbers or as float-formatted numbers.
fn loosely_equal(answer: &ResponseValue, expected: &ResponseValue) -> bool {
    match (answer, expected) {
        (ResponseValue::Number(a), ResponseValue::Number(b)) => a == b,
        _ => answer == expected,
    }
}

fn compare(answer: &ResponseValue, expected: &ResponseValue, op: fn(f64, f64) -> bool) -> bool {
    match (answer.as_number(), expected.as_number()) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

// Lists test membership; everything else tests substring on the text form.
fn contains(answer: &ResponseValue, expected: &ResponseValue) -> bool {
    match answer {
        ResponseValue::List(items) => items.iter().any(|item| loosely_equal(item, expected)),
        other => other.to_string().contains(&expected.to_string()),
    }
}
