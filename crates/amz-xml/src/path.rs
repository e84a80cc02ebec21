//! Evaluation of the small path-selector grammar used against parsed
//! responses. Only named steps and the child / descendant axes exist;
//! that covers every selector the projections use.
use crate::Node;

struct Step<'a> {
    name: &'a str,
    /// Reached via `//` rather than `/`.
    descendant: bool,
}

/// Split a path body (no leading `.` or axis marker) into steps.
/// An empty segment between two `/` marks the following step as a
/// descendant step.
fn parse_steps(body: &str) -> Vec<Step> {
    let mut steps = Vec::new();
    let mut descendant = false;
    for segment in body.split('/') {
        if segment.is_empty() {
            descendant = true;
            continue;
        }
        steps.push(Step {
            name: segment,
            descendant,
        });
        descendant = false;
    }
    steps
}

pub(crate) fn find<'a>(context: &'a Node, path: &str) -> Option<&'a Node> {
    let path = path.trim();

    if let Some(body) = path.strip_prefix("//") {
        // Descendant-or-self: the context node itself may match.
        let mut steps = parse_steps(body);
        if let Some(first) = steps.first_mut() {
            first.descendant = true;
        }
        return eval_descendant_or_self(context, &steps);
    }

    if let Some(body) = path.strip_prefix('/') {
        // Anchored: the first step names the context node.
        let steps = parse_steps(body);
        match steps.first() {
            Some(first) if !first.descendant && first.name == context.name => {
                return eval(context, &steps[1..]);
            }
            _ => return None,
        }
    }

    let body = path.strip_prefix('.').unwrap_or(path);
    if let Some(body) = body.strip_prefix("//") {
        let mut steps = parse_steps(body);
        if let Some(first) = steps.first_mut() {
            first.descendant = true;
        }
        return eval_strict_descendants(context, &steps);
    }
    let body = body.strip_prefix('/').unwrap_or(body);
    eval(context, &parse_steps(body))
}

fn eval<'a>(node: &'a Node, steps: &[Step]) -> Option<&'a Node> {
    let Some(step) = steps.first() else {
        return Some(node);
    };

    if step.descendant {
        eval_strict_descendants(node, steps)
    } else {
        for child in &node.children {
            if child.name == step.name {
                if let Some(found) = eval(child, &steps[1..]) {
                    return Some(found);
                }
            }
        }
        None
    }
}

fn eval_strict_descendants<'a>(node: &'a Node, steps: &[Step]) -> Option<&'a Node> {
    for child in &node.children {
        if let Some(found) = eval_descendant_or_self(child, steps) {
            return Some(found);
        }
    }
    None
}

fn eval_descendant_or_self<'a>(node: &'a Node, steps: &[Step]) -> Option<&'a Node> {
    let Some(step) = steps.first() else {
        return Some(node);
    };

    if node.name == step.name {
        if let Some(found) = eval(node, &steps[1..]) {
            return Some(found);
        }
    }
    for child in &node.children {
        if let Some(found) = eval_descendant_or_self(child, steps) {
            return Some(found);
        }
    }
    None
}
