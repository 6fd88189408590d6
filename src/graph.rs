//! The job dependency graph.
//!
//! Dependencies between jobs are never declared directly. A job depends on
//! another one when it reads a file the other one writes. The
//! [`ProducerIndex`] records who writes what, and the [`JobGraph`] turns that
//! into explicit producer → consumer edges, one node per job.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::ExecutorError;
use crate::job::{Job, VirtualPath};

/// Maps each declared output to the index of the job producing it.
#[derive(Debug, Default, Clone)]
pub struct ProducerIndex {
    producers: HashMap<VirtualPath, usize>,
}

impl ProducerIndex {
    /// Builds the index, failing if two jobs declare the same output.
    ///
    /// A duplicate output is a bug in the planner, so this is checked eagerly
    /// before anything runs.
    pub fn build(jobs: &[Job]) -> Result<Self, ExecutorError> {
        let mut producers = HashMap::new();

        for (index, job) in jobs.iter().enumerate() {
            for output in &job.outputs {
                if let Some(&first) = producers.get(&output.file) {
                    // A job listing the same output twice is still one producer.
                    if first == index {
                        continue;
                    }
                    return Err(ExecutorError::DuplicateProducer {
                        output: output.file.clone(),
                        first,
                        second: index,
                    });
                }
                producers.insert(output.file.clone(), index);
            }
        }

        Ok(Self { producers })
    }

    pub fn producer_of(&self, path: &VirtualPath) -> Option<usize> {
        self.producers.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }
}

/// Producer → consumer edges between jobs. Node `i` is job `i`.
#[derive(Debug, Clone)]
pub struct JobGraph {
    graph: DiGraph<usize, ()>,
}

impl JobGraph {
    /// Wires every input to its producer and rejects cycles.
    ///
    /// Inputs without a producer are external files and add no edge. Several
    /// inputs coming from the same producer add a single edge.
    pub fn build(jobs: &[Job], producers: &ProducerIndex) -> Result<Self, ExecutorError> {
        let mut graph = DiGraph::with_capacity(jobs.len(), jobs.len());

        for index in 0..jobs.len() {
            graph.add_node(index);
        }

        for (index, job) in jobs.iter().enumerate() {
            for input in &job.inputs {
                if let Some(producer) = producers.producer_of(&input.file) {
                    graph.update_edge(NodeIndex::new(producer), NodeIndex::new(index), ());
                }
            }
        }

        // We run toposort primarily to detect any cycles in the graph.
        if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
            let index = cycle.node_id().index();
            return Err(ExecutorError::Cycle {
                index,
                description: jobs[index].description(),
            });
        }

        Ok(Self { graph })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Distinct jobs producing the inputs of job `index`.
    pub fn producers(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.graph
            .neighbors_directed(NodeIndex::new(index), Direction::Incoming)
            .map(NodeIndex::index)
    }

    /// Distinct jobs consuming outputs of job `index`.
    pub fn dependents(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.graph
            .neighbors_directed(NodeIndex::new(index), Direction::Outgoing)
            .map(NodeIndex::index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{FileType, JobKind};

    fn job(inputs: &[&str], outputs: &[&str]) -> Job {
        let mut job = Job::new(JobKind::Other, "tool");
        for input in inputs {
            job = job.input(VirtualPath::literal(*input), FileType::Other);
        }
        for output in outputs {
            job = job.output(VirtualPath::literal(*output), FileType::Other);
        }
        job
    }

    fn sorted(iter: impl Iterator<Item = usize>) -> Vec<usize> {
        let mut items = iter.collect::<Vec<_>>();
        items.sort();
        items
    }

    #[test]
    fn test_producer_index() {
        let jobs = vec![
            job(&["a.c"], &["a.o", "a.d"]),
            job(&["b.c"], &["b.o"]),
            job(&["a.o", "b.o"], &["app"]),
        ];
        let index = ProducerIndex::build(&jobs).unwrap();

        assert_eq!(index.len(), 4);
        assert_eq!(index.producer_of(&VirtualPath::literal("a.d")), Some(0));
        assert_eq!(index.producer_of(&VirtualPath::literal("b.o")), Some(1));
        assert_eq!(index.producer_of(&VirtualPath::literal("app")), Some(2));
        assert_eq!(index.producer_of(&VirtualPath::literal("a.c")), None);
    }

    #[test]
    fn test_duplicate_producer() {
        let jobs = vec![job(&[], &["x.o"]), job(&[], &["dup.o"]), job(&[], &["dup.o"])];

        match ProducerIndex::build(&jobs) {
            Err(ExecutorError::DuplicateProducer {
                output,
                first,
                second,
            }) => {
                assert_eq!(output, VirtualPath::literal("dup.o"));
                assert_eq!((first, second), (1, 2));
            }
            other => panic!("expected duplicate producer, got {other:?}"),
        }
    }

    #[test]
    fn test_same_name_different_class_is_not_duplicate() {
        let jobs = vec![
            Job::new(JobKind::Other, "tool").output(VirtualPath::temporary("a.o"), FileType::Object),
            Job::new(JobKind::Other, "tool").output(VirtualPath::literal("a.o"), FileType::Object),
        ];
        assert!(ProducerIndex::build(&jobs).is_ok());
    }

    #[test]
    fn test_graph_edges() {
        let jobs = vec![
            job(&["a.c"], &["a.o", "a.swiftmodule"]),
            job(&["b.c"], &["b.o"]),
            job(&["a.o", "a.swiftmodule", "b.o"], &["app"]),
        ];
        let producers = ProducerIndex::build(&jobs).unwrap();
        let graph = JobGraph::build(&jobs, &producers).unwrap();

        assert_eq!(graph.len(), 3);
        assert_eq!(sorted(graph.producers(2)), vec![0, 1]);
        assert_eq!(sorted(graph.producers(0)), Vec::<usize>::new());
        assert_eq!(sorted(graph.dependents(0)), vec![2]);
        assert_eq!(sorted(graph.dependents(2)), Vec::<usize>::new());
    }

    #[test]
    fn test_cycle_is_rejected() {
        let jobs = vec![job(&["b"], &["a"]), job(&["a"], &["b"])];
        let producers = ProducerIndex::build(&jobs).unwrap();

        assert!(matches!(
            JobGraph::build(&jobs, &producers),
            Err(ExecutorError::Cycle { .. })
        ));

        let jobs = vec![job(&["self.o"], &["self.o"])];
        let producers = ProducerIndex::build(&jobs).unwrap();
        assert!(matches!(
            JobGraph::build(&jobs, &producers),
            Err(ExecutorError::Cycle { index: 0, .. })
        ));
    }

    #[test]
    fn test_empty_graph() {
        let producers = ProducerIndex::build(&[]).unwrap();
        let graph = JobGraph::build(&[], &producers).unwrap();
        assert!(graph.is_empty());
        assert!(producers.is_empty());
    }
}
