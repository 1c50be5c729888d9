//! Behavior trees for scripted monsters and NPCs
//!
//! Trees are loaded from JSON of the form
//! `{"type": "composite", "name": "sequence", "children": [...]}`.
//! Leaf actions are dispatched by name to a [`BehaviorContext`], usually
//! the entity's script.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use star_core::Json;

use crate::error::{AiError, Result};

/// Status of a behavior node execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BehaviorStatus {
    Success,
    Failure,
    Running,
}

impl BehaviorStatus {
    fn from_bool(value: bool) -> Self {
        if value {
            BehaviorStatus::Success
        } else {
            BehaviorStatus::Failure
        }
    }
}

/// Behavior node types
#[derive(Debug, Clone, PartialEq)]
pub enum BehaviorNode {
    /// Runs children in order, fails if any fails
    Sequence(Vec<BehaviorNode>),
    /// Runs children until one succeeds
    Selector(Vec<BehaviorNode>),
    /// Runs all children each tick
    Parallel {
        children: Vec<BehaviorNode>,
        success_threshold: usize,
        failure_threshold: usize,
    },
    /// Selector that restarts from the first child every tick, so a higher
    /// priority child preempts a running lower one
    Dynamic(Vec<BehaviorNode>),
    /// Named leaf handled by the context
    Action {
        name: String,
        parameters: HashMap<String, Json>,
    },
    Inverter(Box<BehaviorNode>),
    Succeeder(Box<BehaviorNode>),
    /// Repeats the child `times` times, forever with `None`
    Repeater {
        child: Box<BehaviorNode>,
        times: Option<u32>,
        until_failure: bool,
    },
    Wait(f32),
}

impl BehaviorNode {
    pub fn sequence(children: Vec<BehaviorNode>) -> Self {
        Self::Sequence(children)
    }

    pub fn selector(children: Vec<BehaviorNode>) -> Self {
        Self::Selector(children)
    }

    pub fn dynamic(children: Vec<BehaviorNode>) -> Self {
        Self::Dynamic(children)
    }

    /// Parallel node that fails on the first failing child
    pub fn parallel(children: Vec<BehaviorNode>, success_threshold: usize) -> Self {
        Self::Parallel {
            children,
            success_threshold,
            failure_threshold: 1,
        }
    }

    pub fn action(name: impl Into<String>) -> Self {
        Self::Action {
            name: name.into(),
            parameters: HashMap::new(),
        }
    }

    pub fn action_with(name: impl Into<String>, parameters: HashMap<String, Json>) -> Self {
        Self::Action {
            name: name.into(),
            parameters,
        }
    }

    pub fn inverter(child: BehaviorNode) -> Self {
        Self::Inverter(Box::new(child))
    }

    pub fn succeeder(child: BehaviorNode) -> Self {
        Self::Succeeder(Box::new(child))
    }

    pub fn repeater(child: BehaviorNode, times: u32) -> Self {
        Self::Repeater {
            child: Box::new(child),
            times: Some(times),
            until_failure: false,
        }
    }

    pub fn wait(seconds: f32) -> Self {
        Self::Wait(seconds)
    }

    /// Parse a node from its JSON description
    pub fn from_json(json: &Json) -> Result<Self> {
        let kind = json
            .get("type")
            .and_then(Json::as_str)
            .ok_or_else(|| AiError::InvalidBehavior(format!("node without type: {json}")))?;
        let name = json
            .get("name")
            .and_then(Json::as_str)
            .ok_or_else(|| AiError::InvalidBehavior(format!("node without name: {json}")))?;
        let parameters = json.get("parameters").cloned().unwrap_or(Json::Null);
        let number = |key: &str| parameters.get(key).and_then(Json::as_f64);

        match kind {
            "action" => {
                if name == "wait" {
                    return Ok(Self::Wait(number("duration").unwrap_or(0.0) as f32));
                }
                let parameters = match &parameters {
                    Json::Object(map) => map.clone().into_iter().collect(),
                    Json::Null => HashMap::new(),
                    other => {
                        return Err(AiError::InvalidBehavior(format!(
                            "parameters of '{name}' must be an object, got {other}"
                        )))
                    }
                };
                Ok(Self::action_with(name, parameters))
            }
            "composite" => {
                let children = json
                    .get("children")
                    .and_then(Json::as_array)
                    .map(|children| children.iter().map(Self::from_json).collect::<Result<Vec<_>>>())
                    .transpose()?
                    .unwrap_or_default();
                match name {
                    "sequence" => Ok(Self::Sequence(children)),
                    "selector" => Ok(Self::Selector(children)),
                    "dynamic" => Ok(Self::Dynamic(children)),
                    "parallel" => {
                        let count = children.len();
                        let success = number("success").map_or(count, |n| n.max(0.0) as usize);
                        let failure = number("fail").map_or(1, |n| n.max(0.0) as usize);
                        Ok(Self::Parallel {
                            children,
                            success_threshold: success,
                            failure_threshold: failure,
                        })
                    }
                    _ => Err(AiError::UnknownNode {
                        kind: "composite",
                        name: name.to_string(),
                    }),
                }
            }
            "decorator" => {
                let child = json
                    .get("child")
                    .ok_or_else(|| AiError::InvalidBehavior(format!("decorator '{name}' has no child")))?;
                let child = Box::new(Self::from_json(child)?);
                match name {
                    "inverter" => Ok(Self::Inverter(child)),
                    "succeeder" => Ok(Self::Succeeder(child)),
                    "repeater" => Ok(Self::Repeater {
                        child,
                        times: number("maxLoops").filter(|n| *n >= 0.0).map(|n| n as u32),
                        until_failure: parameters
                            .get("untilFailure")
                            .and_then(Json::as_bool)
                            .unwrap_or(false),
                    }),
                    _ => Err(AiError::UnknownNode {
                        kind: "decorator",
                        name: name.to_string(),
                    }),
                }
            }
            _ => Err(AiError::UnknownNode {
                kind: "node",
                name: kind.to_string(),
            }),
        }
    }

    fn count(&self) -> usize {
        1 + match self {
            Self::Sequence(children) | Self::Selector(children) | Self::Dynamic(children) => {
                children.iter().map(Self::count).sum()
            }
            Self::Parallel { children, .. } => children.iter().map(Self::count).sum(),
            Self::Inverter(child) | Self::Succeeder(child) => child.count(),
            Self::Repeater { child, .. } => child.count(),
            Self::Action { .. } | Self::Wait(_) => 0,
        }
    }
}

/// Shared key/value memory of one tree instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Blackboard {
    values: HashMap<String, Json>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Json> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Json) {
        let key = key.into();
        if value.is_null() {
            self.values.remove(&key);
        } else {
            self.values.insert(key, value);
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Resolve an action parameter: `{"key": k}` reads the blackboard,
    /// `{"value": v}` is a literal, anything else is taken as is
    pub fn resolve(&self, parameter: &Json) -> Json {
        if let Some(key) = parameter.get("key").and_then(Json::as_str) {
            if let Some(value) = self.values.get(key) {
                return value.clone();
            }
            return parameter.get("value").cloned().unwrap_or(Json::Null);
        }
        if let Some(value) = parameter.get("value") {
            return value.clone();
        }
        parameter.clone()
    }
}

/// Executes the leaf actions of a tree
pub trait BehaviorContext {
    fn run_action(
        &mut self,
        name: &str,
        parameters: &HashMap<String, Json>,
        blackboard: &mut Blackboard,
        dt: f32,
    ) -> BehaviorStatus;
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
enum NodeState {
    #[default]
    Idle,
    /// Child index a composite resumes from
    Child(usize),
    Elapsed(f32),
    Loops(u32),
}

/// A behavior tree plus the per-node state of one running instance
#[derive(Debug, Clone)]
pub struct BehaviorTree {
    root: BehaviorNode,
    states: Vec<NodeState>,
    blackboard: Blackboard,
}

impl BehaviorTree {
    pub fn new(root: BehaviorNode) -> Self {
        let states = vec![NodeState::Idle; root.count()];
        Self {
            root,
            states,
            blackboard: Blackboard::new(),
        }
    }

    pub fn from_json(json: &Json) -> Result<Self> {
        let root = json.get("root").unwrap_or(json);
        Ok(Self::new(BehaviorNode::from_json(root)?))
    }

    pub fn root(&self) -> &BehaviorNode {
        &self.root
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        &mut self.blackboard
    }

    /// Forget any running progress
    pub fn reset(&mut self) {
        self.states.fill(NodeState::Idle);
    }

    /// Tick the tree once
    pub fn run<C: BehaviorContext + ?Sized>(&mut self, context: &mut C, dt: f32) -> BehaviorStatus {
        let mut runner = Runner {
            states: &mut self.states,
            blackboard: &mut self.blackboard,
            context,
            dt,
        };
        let status = runner.run(&self.root, 0);
        if status != BehaviorStatus::Running {
            self.states.fill(NodeState::Idle);
        }
        status
    }
}

struct Runner<'a, C: BehaviorContext + ?Sized> {
    states: &'a mut [NodeState],
    blackboard: &'a mut Blackboard,
    context: &'a mut C,
    dt: f32,
}

impl<C: BehaviorContext + ?Sized> Runner<'_, C> {
    /// Run `node` whose preorder index is `id`
    fn run(&mut self, node: &BehaviorNode, id: usize) -> BehaviorStatus {
        let status = match node {
            BehaviorNode::Sequence(children) => {
                self.run_ordered(children, id, BehaviorStatus::Failure, true)
            }
            BehaviorNode::Selector(children) => {
                self.run_ordered(children, id, BehaviorStatus::Success, true)
            }
            BehaviorNode::Dynamic(children) => {
                self.run_ordered(children, id, BehaviorStatus::Success, false)
            }
            BehaviorNode::Parallel {
                children,
                success_threshold,
                failure_threshold,
            } => {
                let mut successes = 0;
                let mut failures = 0;
                let mut child_id = id + 1;
                for child in children {
                    match self.run(child, child_id) {
                        BehaviorStatus::Success => successes += 1,
                        BehaviorStatus::Failure => failures += 1,
                        BehaviorStatus::Running => {}
                    }
                    child_id += child.count();
                }
                if successes >= *success_threshold {
                    BehaviorStatus::Success
                } else if failures >= *failure_threshold
                    || successes + failures == children.len()
                {
                    BehaviorStatus::Failure
                } else {
                    BehaviorStatus::Running
                }
            }
            BehaviorNode::Action { name, parameters } => {
                let resolved: HashMap<String, Json> = parameters
                    .iter()
                    .map(|(key, value)| (key.clone(), self.blackboard.resolve(value)))
                    .collect();
                self.context.run_action(name, &resolved, &mut *self.blackboard, self.dt)
            }
            BehaviorNode::Inverter(child) => match self.run(child, id + 1) {
                BehaviorStatus::Success => BehaviorStatus::Failure,
                BehaviorStatus::Failure => BehaviorStatus::Success,
                BehaviorStatus::Running => BehaviorStatus::Running,
            },
            BehaviorNode::Succeeder(child) => match self.run(child, id + 1) {
                BehaviorStatus::Running => BehaviorStatus::Running,
                _ => BehaviorStatus::Success,
            },
            BehaviorNode::Repeater {
                child,
                times,
                until_failure,
            } => {
                let loops = match self.states[id] {
                    NodeState::Loops(loops) => loops,
                    _ => 0,
                };
                match self.run(child, id + 1) {
                    BehaviorStatus::Running => {
                        self.states[id] = NodeState::Loops(loops);
                        BehaviorStatus::Running
                    }
                    BehaviorStatus::Failure if *until_failure => BehaviorStatus::Success,
                    BehaviorStatus::Failure if times.is_some() => BehaviorStatus::Failure,
                    _ => {
                        let loops = loops + 1;
                        if times.is_some_and(|times| loops >= times) {
                            BehaviorStatus::Success
                        } else {
                            self.states[id] = NodeState::Loops(loops);
                            self.clear_subtree(child, id + 1);
                            BehaviorStatus::Running
                        }
                    }
                }
            }
            BehaviorNode::Wait(duration) => {
                let elapsed = match self.states[id] {
                    NodeState::Elapsed(elapsed) => elapsed,
                    _ => 0.0,
                } + self.dt;
                if elapsed >= *duration {
                    BehaviorStatus::Success
                } else {
                    self.states[id] = NodeState::Elapsed(elapsed);
                    BehaviorStatus::Running
                }
            }
        };
        if status != BehaviorStatus::Running {
            self.states[id] = NodeState::Idle;
        }
        status
    }

    /// Sequence and selector share this loop: `stop` is the child status
    /// that ends the walk early and also becomes the result
    fn run_ordered(
        &mut self,
        children: &[BehaviorNode],
        id: usize,
        stop: BehaviorStatus,
        resume: bool,
    ) -> BehaviorStatus {
        let start = match self.states[id] {
            NodeState::Child(index) if resume => index,
            _ => 0,
        };
        let mut child_id = id + 1;
        for (index, child) in children.iter().enumerate() {
            if index < start {
                child_id += child.count();
                continue;
            }
            let status = self.run(child, child_id);
            if status == BehaviorStatus::Running {
                if !resume {
                    // A higher priority child took over, drop what the others were doing
                    let mut later = child_id + child.count();
                    for other in &children[index + 1..] {
                        self.clear_subtree(other, later);
                        later += other.count();
                    }
                }
                self.states[id] = NodeState::Child(index);
                return BehaviorStatus::Running;
            }
            if status == stop {
                return stop;
            }
            child_id += child.count();
        }
        BehaviorStatus::from_bool(stop == BehaviorStatus::Failure)
    }

    fn clear_subtree(&mut self, node: &BehaviorNode, id: usize) {
        let end = id + node.count();
        self.states[id..end].fill(NodeState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Actions succeed unless scripted otherwise
    #[derive(Default)]
    struct TestContext {
        results: HashMap<String, Vec<BehaviorStatus>>,
        calls: Vec<String>,
    }

    impl TestContext {
        fn script(mut self, name: &str, results: &[BehaviorStatus]) -> Self {
            self.results.insert(name.to_string(), results.to_vec());
            self
        }
    }

    impl BehaviorContext for TestContext {
        fn run_action(
            &mut self,
            name: &str,
            parameters: &HashMap<String, Json>,
            blackboard: &mut Blackboard,
            _dt: f32,
        ) -> BehaviorStatus {
            self.calls.push(name.to_string());
            if name == "store" {
                if let Some(value) = parameters.get("value") {
                    blackboard.set("stored", value.clone());
                }
                return BehaviorStatus::Success;
            }
            match self.results.get_mut(name) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => BehaviorStatus::Success,
            }
        }
    }

    use BehaviorStatus::*;

    #[test]
    fn test_sequence() {
        let mut tree = BehaviorTree::new(BehaviorNode::sequence(vec![
            BehaviorNode::action("a"),
            BehaviorNode::action("b"),
        ]));
        let mut context = TestContext::default();
        assert_eq!(tree.run(&mut context, 0.1), Success);
        assert_eq!(context.calls, ["a", "b"]);
    }

    #[test]
    fn test_sequence_failure() {
        let mut tree = BehaviorTree::new(BehaviorNode::sequence(vec![
            BehaviorNode::action("a"),
            BehaviorNode::action("b"),
        ]));
        let mut context = TestContext::default().script("a", &[Failure]);
        assert_eq!(tree.run(&mut context, 0.1), Failure);
        assert_eq!(context.calls, ["a"]);
    }

    #[test]
    fn test_sequence_resumes_running_child() {
        let mut tree = BehaviorTree::new(BehaviorNode::sequence(vec![
            BehaviorNode::action("a"),
            BehaviorNode::action("b"),
        ]));
        let mut context = TestContext::default().script("b", &[Running]);
        assert_eq!(tree.run(&mut context, 0.1), Running);
        assert_eq!(tree.run(&mut context, 0.1), Success);
        assert_eq!(context.calls, ["a", "b", "b"]);
    }

    #[test]
    fn test_selector() {
        let mut tree = BehaviorTree::new(BehaviorNode::selector(vec![
            BehaviorNode::action("a"),
            BehaviorNode::action("b"),
        ]));
        let mut context = TestContext::default().script("a", &[Failure]);
        assert_eq!(tree.run(&mut context, 0.1), Success);
        assert_eq!(context.calls, ["a", "b"]);
    }

    #[test]
    fn test_dynamic_rechecks_earlier_children() {
        let mut tree = BehaviorTree::new(BehaviorNode::dynamic(vec![
            BehaviorNode::action("urgent"),
            BehaviorNode::action("idle"),
        ]));
        let mut context = TestContext::default()
            .script("urgent", &[Failure, Failure])
            .script("idle", &[Running, Running]);
        assert_eq!(tree.run(&mut context, 0.1), Running);
        assert_eq!(tree.run(&mut context, 0.1), Running);
        assert_eq!(tree.run(&mut context, 0.1), Success);
        assert_eq!(context.calls, ["urgent", "idle", "urgent", "idle", "urgent"]);
    }

    #[test]
    fn test_parallel_thresholds() {
        let mut tree = BehaviorTree::new(BehaviorNode::parallel(
            vec![BehaviorNode::action("a"), BehaviorNode::action("b")],
            2,
        ));
        let mut context = TestContext::default().script("b", &[Running]);
        assert_eq!(tree.run(&mut context, 0.1), Running);
        assert_eq!(tree.run(&mut context, 0.1), Success);

        let mut context = TestContext::default().script("a", &[Failure]);
        assert_eq!(tree.run(&mut context, 0.1), Failure);
    }

    #[test]
    fn test_inverter_and_succeeder() {
        let mut context = TestContext::default().script("a", &[Failure, Failure]);
        let mut inverted = BehaviorTree::new(BehaviorNode::inverter(BehaviorNode::action("a")));
        assert_eq!(inverted.run(&mut context, 0.1), Success);
        let mut succeeder = BehaviorTree::new(BehaviorNode::succeeder(BehaviorNode::action("a")));
        assert_eq!(succeeder.run(&mut context, 0.1), Success);
    }

    #[test]
    fn test_wait_accumulates_per_node() {
        let mut tree = BehaviorTree::new(BehaviorNode::sequence(vec![
            BehaviorNode::wait(0.25),
            BehaviorNode::wait(0.25),
        ]));
        let mut context = TestContext::default();
        let mut ticks = 1;
        while tree.run(&mut context, 0.1) == Running {
            ticks += 1;
        }
        // Each wait needs three ticks of 0.1, the second starts on the
        // tick the first one finishes
        assert_eq!(ticks, 5);
    }

    #[test]
    fn test_repeater_counts_loops() {
        let mut tree = BehaviorTree::new(BehaviorNode::repeater(BehaviorNode::action("a"), 3));
        let mut context = TestContext::default();
        assert_eq!(tree.run(&mut context, 0.1), Running);
        assert_eq!(tree.run(&mut context, 0.1), Running);
        assert_eq!(tree.run(&mut context, 0.1), Success);
        assert_eq!(context.calls.len(), 3);
    }

    #[test]
    fn test_from_json_with_blackboard_parameters() {
        let json = json!({
            "root": {
                "type": "composite",
                "name": "sequence",
                "children": [
                    {"type": "action", "name": "store", "parameters": {"value": {"value": 7}}},
                    {"type": "action", "name": "wait", "parameters": {"duration": 0.0}},
                    {
                        "type": "decorator",
                        "name": "inverter",
                        "child": {"type": "action", "name": "check", "parameters": {"target": {"key": "stored"}}}
                    }
                ]
            }
        });
        let mut tree = BehaviorTree::from_json(&json).unwrap();
        let mut context = TestContext::default().script("check", &[Failure]);
        assert_eq!(tree.run(&mut context, 0.1), Success);
        assert_eq!(tree.blackboard().get("stored"), Some(&json!(7)));
    }

    #[test]
    fn test_from_json_rejects_unknown_nodes() {
        let json = json!({"type": "composite", "name": "shuffle", "children": []});
        assert!(matches!(
            BehaviorNode::from_json(&json),
            Err(AiError::UnknownNode { kind: "composite", .. })
        ));
        assert!(BehaviorNode::from_json(&json!({"name": "x"})).is_err());
    }
}
