//! Pipeline orchestration.
//!
//! The analysis graph is fixed: declared once as a static list of
//! nodes and dependencies, validated acyclic at construction, and
//! executed in waves of ready nodes. Hard dependencies gate execution
//! (a node whose hard dependency did not complete is skipped); soft
//! dependencies only order it. A failed node is recorded and its
//! strict dependents are skipped, while independent branches continue.

use crate::cache::CacheIndex;
use crate::extract::{ExtractStrategy, ExtractionCascade};
use crate::llm::LlmProvider;
use crate::pipeline::nodes::{
    AcquireNode, AggregateNode, AspectKind, AspectNode, DocTarget, Node, NodeId, ParseNode,
    PeriodComparisonNode,
};
use crate::pipeline::state::AnalysisState;
use anyhow::{bail, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One node plus its dependencies in the graph.
pub struct NodeSpec {
    pub node: Box<dyn Node>,
    /// Dependencies that must complete for this node to run.
    pub hard_deps: Vec<NodeId>,
    /// Dependencies that only order this node's execution.
    pub soft_deps: Vec<NodeId>,
}

impl NodeSpec {
    fn all_deps(&self) -> impl Iterator<Item = &NodeId> {
        self.hard_deps.iter().chain(self.soft_deps.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeStatus {
    Pending,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    fn settled(&self) -> bool {
        !matches!(self, NodeStatus::Pending)
    }
}

/// Collaborators injected into the pipeline at the composition root.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn crate::registry::DocumentFetcher>,
    pub cache: Arc<CacheIndex>,
    pub provider: Arc<dyn LlmProvider>,
    pub cascade: Arc<ExtractionCascade>,
    pub download_dir: PathBuf,
    pub strategy: ExtractStrategy,
}

/// A validated, executable analysis graph.
struct Graph {
    specs: Vec<NodeSpec>,
}

impl Graph {
    fn new(specs: Vec<NodeSpec>) -> Result<Self> {
        validate(&specs)?;
        Ok(Self { specs })
    }

    fn spec(&self, id: NodeId) -> &NodeSpec {
        self.specs
            .iter()
            .find(|s| s.node.id() == id)
            .expect("node id registered at construction")
    }

    /// Execute the graph to completion over the given state.
    async fn run(&self, state: &mut AnalysisState) {
        let mut status: HashMap<NodeId, NodeStatus> = self
            .specs
            .iter()
            .map(|s| (s.node.id(), NodeStatus::Pending))
            .collect();

        loop {
            // Nodes whose dependencies have all settled.
            let ready: Vec<&NodeSpec> = self
                .specs
                .iter()
                .filter(|spec| {
                    status[&spec.node.id()] == NodeStatus::Pending
                        && spec.all_deps().all(|dep| status[dep].settled())
                })
                .collect();

            if ready.is_empty() {
                break;
            }

            let mut wave = Vec::new();
            for spec in ready {
                let id = spec.node.id();
                let unmet = spec
                    .hard_deps
                    .iter()
                    .find(|dep| status[dep] != NodeStatus::Completed);
                if let Some(dep) = unmet {
                    debug!("Skipping {}: dependency {} did not complete", id, dep);
                    status.insert(id, NodeStatus::Skipped);
                } else {
                    wave.push(spec);
                }
            }
            if wave.is_empty() {
                continue;
            }

            // Run the wave concurrently over a read-only snapshot; the
            // join below is the only synchronization point.
            let mut results = Vec::new();
            {
                let snapshot: &AnalysisState = state;
                let mut running: FuturesUnordered<_> = wave
                    .iter()
                    .map(|&spec| async move {
                        let id = spec.node.id();
                        info!("Starting node: {}", id);
                        (id, spec.node.execute(snapshot).await)
                    })
                    .collect();
                while let Some(outcome) = running.next().await {
                    results.push(outcome);
                }
            }

            // Fold patches in finish order; keys are disjoint by design.
            for (id, result) in results {
                match result {
                    Ok(output) => {
                        let patch = self.spec(id).node.update(output);
                        state.apply(patch);
                        state.record_completed(id.as_str());
                        status.insert(id, NodeStatus::Completed);
                        info!("Completed node: {}", id);
                    }
                    Err(error) => {
                        warn!("Node {} failed: {:#}", id, error);
                        state.record_error(format!("{}: {:#}", id.as_str(), error));
                        status.insert(id, NodeStatus::Failed);
                    }
                }
            }
        }
    }
}

/// Reject duplicate ids, unknown dependencies and cycles.
fn validate(specs: &[NodeSpec]) -> Result<()> {
    let ids: HashSet<NodeId> = specs.iter().map(|s| s.node.id()).collect();
    if ids.len() != specs.len() {
        bail!("analysis graph contains duplicate node ids");
    }

    for spec in specs {
        for dep in spec.all_deps() {
            if !ids.contains(dep) {
                bail!(
                    "analysis graph references unknown dependency {} from {}",
                    dep,
                    spec.node.id()
                );
            }
        }
    }

    // Kahn's algorithm over the combined dependency edges.
    let mut indegree: HashMap<NodeId, usize> = HashMap::new();
    let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for spec in specs {
        let id = spec.node.id();
        indegree.entry(id).or_insert(0);
        for dep in spec.all_deps() {
            *indegree.entry(id).or_insert(0) += 1;
            dependents.entry(*dep).or_default().push(id);
        }
    }

    let mut queue: VecDeque<NodeId> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0;
    while let Some(id) = queue.pop_front() {
        visited += 1;
        for dependent in dependents.get(&id).into_iter().flatten() {
            let degree = indegree.get_mut(dependent).expect("dependent registered");
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(*dependent);
            }
        }
    }

    if visited != specs.len() {
        bail!("analysis graph contains a dependency cycle");
    }
    Ok(())
}

/// Build the node table for one run shape.
fn build_specs(deps: &Collaborators, with_prior: bool) -> Vec<NodeSpec> {
    let mut specs = vec![
        NodeSpec {
            node: Box::new(AcquireNode::new(
                deps.fetcher.clone(),
                deps.cache.clone(),
                deps.download_dir.clone(),
                DocTarget::Current,
            )),
            hard_deps: vec![],
            soft_deps: vec![],
        },
        NodeSpec {
            node: Box::new(ParseNode::new(
                deps.cascade.clone(),
                deps.strategy,
                DocTarget::Current,
            )),
            hard_deps: vec![NodeId::Acquire],
            soft_deps: vec![],
        },
        NodeSpec {
            node: Box::new(AspectNode::new(deps.provider.clone(), AspectKind::Business)),
            hard_deps: vec![NodeId::Parse],
            soft_deps: vec![],
        },
        NodeSpec {
            node: Box::new(AspectNode::new(deps.provider.clone(), AspectKind::Risks)),
            hard_deps: vec![NodeId::Parse],
            soft_deps: vec![],
        },
        NodeSpec {
            node: Box::new(AspectNode::new(
                deps.provider.clone(),
                AspectKind::Financials,
            )),
            hard_deps: vec![NodeId::Parse],
            soft_deps: vec![],
        },
    ];

    let mut aggregate_soft = vec![
        NodeId::BusinessSummary,
        NodeId::RiskExtraction,
        NodeId::FinancialAnalysis,
    ];

    if with_prior {
        specs.push(NodeSpec {
            node: Box::new(AcquireNode::new(
                deps.fetcher.clone(),
                deps.cache.clone(),
                deps.download_dir.clone(),
                DocTarget::Prior,
            )),
            hard_deps: vec![],
            soft_deps: vec![],
        });
        specs.push(NodeSpec {
            node: Box::new(ParseNode::new(
                deps.cascade.clone(),
                deps.strategy,
                DocTarget::Prior,
            )),
            hard_deps: vec![NodeId::AcquirePrior],
            soft_deps: vec![],
        });
        // The comparison needs both texts; the aspect results only
        // order it.
        specs.push(NodeSpec {
            node: Box::new(PeriodComparisonNode::new(deps.provider.clone())),
            hard_deps: vec![NodeId::Parse, NodeId::ParsePrior],
            soft_deps: vec![
                NodeId::BusinessSummary,
                NodeId::RiskExtraction,
                NodeId::FinancialAnalysis,
            ],
        });
        aggregate_soft.push(NodeId::PeriodComparison);
    }

    // Aggregate has no hard dependencies: it runs on whatever subset
    // of aspects settled and decides for itself whether the run is a
    // total loss.
    specs.push(NodeSpec {
        node: Box::new(AggregateNode::new(deps.provider.clone())),
        hard_deps: vec![],
        soft_deps: aggregate_soft,
    });

    specs
}

/// The analysis pipeline: both graph shapes, validated once.
pub struct AnalysisPipeline {
    single: Graph,
    comparative: Graph,
}

impl AnalysisPipeline {
    /// Build and validate both run shapes.
    pub fn new(deps: Collaborators) -> Result<Self> {
        Ok(Self {
            single: Graph::new(build_specs(&deps, false))?,
            comparative: Graph::new(build_specs(&deps, true))?,
        })
    }

    /// Run a full analysis, returning the final state.
    ///
    /// The state carries the composite report on success, or whatever
    /// partial results and errors accumulated.
    pub async fn run(&self, doc_id: &str, prior_doc_id: Option<&str>) -> AnalysisState {
        info!(
            "Starting analysis for {} (prior: {})",
            doc_id,
            prior_doc_id.unwrap_or("none")
        );

        let mut state = AnalysisState::new(doc_id, prior_doc_id.map(String::from));
        let graph = if prior_doc_id.is_some() {
            &self.comparative
        } else {
            &self.single
        };

        graph.run(&mut state).await;

        if state.errors.is_empty() {
            info!("Analysis completed successfully");
        } else {
            warn!("Analysis completed with errors: {:?}", state.errors);
        }
        state
    }
}
