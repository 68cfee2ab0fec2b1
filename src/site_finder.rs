
use crate::data_types::graph::{Edge, Node, NodeId, NodeTraversal, VariationGraph};
use crate::data_types::locus::Site;

use bio::alphabets::dna::revcomp;
use bit_vec::BitVec;
use log::debug;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use simple_error::bail;
use std::collections::BTreeSet;

/// A side table mapping transformed node ids back to original oriented nodes.
/// Transformations never mutate node structures; they compose these tables.
#[derive(Clone, Debug, Default)]
pub struct NodeTranslation {
    map: HashMap<NodeId, (NodeId, bool)>
}

impl NodeTranslation {
    pub fn insert(&mut self, new_id: NodeId, old_id: NodeId, backward: bool) {
        self.map.insert(new_id, (old_id, backward));
    }

    /// Resolves a transformed id to its original oriented node.
    /// # Errors
    /// * if the id has no translation entry
    pub fn translate(&self, id: NodeId) -> Result<(NodeId, bool), Box<dyn std::error::Error>> {
        match self.map.get(&id) {
            Some(&entry) => Ok(entry),
            None => bail!("no translation entry for node {}", id)
        }
    }

    /// Function composition over ids: `self` maps the newest ids into the
    /// domain of `older`, which maps the rest of the way back. Orientations
    /// compose by XOR.
    pub fn compose(&self, older: &NodeTranslation) -> Result<NodeTranslation, Box<dyn std::error::Error>> {
        let mut composed = NodeTranslation::default();
        for (&new_id, &(mid_id, flipped)) in self.map.iter() {
            let (old_id, older_flipped) = older.translate(mid_id)?;
            composed.insert(new_id, old_id, flipped != older_flipped);
        }
        Ok(composed)
    }
}

/// Replicates nodes reachable in reverse orientation so that every walk in the
/// bidirected graph becomes a forward walk over node copies. Forward copies
/// keep their original ids; reverse copies get fresh ids and reverse-complement
/// sequences. Reverse replication is bounded by `max_length` bases of reversed
/// sequence per stretch.
/// # Arguments
/// * `graph` - the original bidirected graph
/// * `max_length` - maximum reversed-stretch length to replicate, in bases
pub fn unfold(graph: &VariationGraph, max_length: usize) -> Result<(VariationGraph, NodeTranslation), Box<dyn std::error::Error>> {
    let mut translation = NodeTranslation::default();
    let mut unfolded = VariationGraph::new();

    // every node gets a forward copy under its own id
    for id in graph.node_ids() {
        unfolded.add_node(Node { id, sequence: graph.node_seq(id)?.to_vec() })?;
        translation.insert(id, id, false);
    }

    // discover reverse orientations reachable from forward walks, tracking the
    // accumulated reversed sequence length so long reversals stay bounded
    let mut next_id = graph.max_node_id() + 1;
    let mut reverse_copy: HashMap<NodeId, NodeId> = Default::default();
    let mut queue: std::collections::VecDeque<(NodeTraversal, usize)> = Default::default();
    for id in graph.node_ids() {
        queue.push_back((NodeTraversal::new(id, false), 0));
    }
    while let Some((state, reversed_len)) = queue.pop_front() {
        for next in graph.next_traversals(state) {
            if !next.backward {
                // forward states are all seeded already
                continue;
            }
            let next_len = reversed_len + graph.node_seq(next.node)?.len();
            if next_len > max_length || reverse_copy.contains_key(&next.node) {
                continue;
            }
            let copy_id = next_id;
            next_id += 1;
            reverse_copy.insert(next.node, copy_id);
            unfolded.add_node(Node { id: copy_id, sequence: revcomp(graph.node_seq(next.node)?) })?;
            translation.insert(copy_id, next.node, true);
            queue.push_back((next, next_len));
        }
    }

    // materialize every oriented step between existing copies as a canonical
    // end-to-start edge
    let copy_of = |t: NodeTraversal| -> Option<NodeId> {
        if t.backward {
            reverse_copy.get(&t.node).copied()
        } else {
            Some(t.node)
        }
    };
    let mut states: Vec<NodeTraversal> = graph.node_ids()
        .map(|id| NodeTraversal::new(id, false))
        .collect();
    states.extend(reverse_copy.keys().map(|&id| NodeTraversal::new(id, true)));
    for state in states.into_iter() {
        let from_copy = match copy_of(state) {
            Some(c) => c,
            None => continue
        };
        for next in graph.next_traversals(state) {
            if let Some(to_copy) = copy_of(next) {
                unfolded.add_edge(Edge { from: from_copy, from_start: false, to: to_copy, to_end: false })?;
            }
        }
    }

    Ok((unfolded, translation))
}

/// Computes strongly connected components of a digraph given successor lists.
/// Iterative Tarjan; components come out in reverse topological order.
fn strongly_connected_components(successors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = successors.len();
    const UNSET: usize = usize::MAX;
    let mut index: Vec<usize> = vec![UNSET; n];
    let mut lowlink: Vec<usize> = vec![0; n];
    let mut on_stack: BitVec = BitVec::from_elem(n, false);
    let mut stack: Vec<usize> = vec![];
    let mut components: Vec<Vec<usize>> = vec![];
    let mut next_index: usize = 0;

    for root in 0..n {
        if index[root] != UNSET {
            continue;
        }
        let mut work: Vec<(usize, usize)> = vec![(root, 0)];
        index[root] = next_index;
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack.set(root, true);

        while let Some(&(v, cursor)) = work.last() {
            if cursor < successors[v].len() {
                work.last_mut().unwrap().1 += 1;
                let w = successors[v][cursor];
                if index[w] == UNSET {
                    index[w] = next_index;
                    lowlink[w] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack.set(w, true);
                    work.push((w, 0));
                } else if on_stack[w] {
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            } else {
                work.pop();
                if let Some(&(parent, _)) = work.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }
                if lowlink[v] == index[v] {
                    let mut component = vec![];
                    loop {
                        let w = stack.pop().unwrap();
                        on_stack.set(w, false);
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    components.push(component);
                }
            }
        }
    }
    components
}

/// Duplicates nodes along cycles so the canonical graph becomes a DAG.
/// Each cyclic component is unrolled into `steps + 1` layers; edges that close
/// a cycle advance one layer, and edges out of the final layer are dropped.
/// # Arguments
/// * `graph` - a canonical graph (all edges end-to-start)
/// * `steps` - how many cycle-closing steps to preserve
pub fn dagify(graph: &VariationGraph, steps: usize) -> Result<(VariationGraph, NodeTranslation), Box<dyn std::error::Error>> {
    // dense indexing for the component machinery
    let mut ids: Vec<NodeId> = graph.node_ids().collect();
    ids.sort_unstable();
    let id_to_idx: HashMap<NodeId, usize> = ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
    let mut successors: Vec<Vec<usize>> = vec![vec![]; ids.len()];
    for edge in graph.edges() {
        successors[id_to_idx[&edge.from]].push(id_to_idx[&edge.to]);
    }

    let components = strongly_connected_components(&successors);
    let mut component_of: Vec<usize> = vec![0; ids.len()];
    for (ci, component) in components.iter().enumerate() {
        for &v in component.iter() {
            component_of[v] = ci;
        }
    }
    let mut cyclic: Vec<bool> = vec![false; components.len()];
    for (ci, component) in components.iter().enumerate() {
        cyclic[ci] = component.len() > 1
            || successors[component[0]].contains(&component[0]);
    }

    // rank nodes inside each cyclic component by DFS reverse postorder, so
    // rank-decreasing edges are the ones that close cycles
    let mut rank: Vec<usize> = vec![0; ids.len()];
    for (ci, component) in components.iter().enumerate() {
        if !cyclic[ci] {
            continue;
        }
        let members: HashSet<usize> = component.iter().copied().collect();
        let mut postorder: Vec<usize> = vec![];
        let mut seen: HashSet<usize> = Default::default();
        let mut start_points = component.to_vec();
        start_points.sort_unstable();
        for &start in start_points.iter() {
            if seen.contains(&start) {
                continue;
            }
            let mut work: Vec<(usize, usize)> = vec![(start, 0)];
            seen.insert(start);
            while let Some(&(v, cursor)) = work.last() {
                if cursor < successors[v].len() {
                    work.last_mut().unwrap().1 += 1;
                    let w = successors[v][cursor];
                    if members.contains(&w) && !seen.contains(&w) {
                        seen.insert(w);
                        work.push((w, 0));
                    }
                } else {
                    postorder.push(v);
                    work.pop();
                }
            }
        }
        for (position, &v) in postorder.iter().rev().enumerate() {
            rank[v] = position;
        }
    }

    // build the unrolled graph; layer 0 keeps original ids
    let mut translation = NodeTranslation::default();
    let mut dag = VariationGraph::new();
    let mut next_id = graph.max_node_id() + 1;
    let mut layer_id: HashMap<(usize, usize), NodeId> = Default::default();
    for (v, &id) in ids.iter().enumerate() {
        let layers = if cyclic[component_of[v]] { steps + 1 } else { 1 };
        for layer in 0..layers {
            let copy_id = if layer == 0 {
                id
            } else {
                let fresh = next_id;
                next_id += 1;
                fresh
            };
            layer_id.insert((v, layer), copy_id);
            dag.add_node(Node { id: copy_id, sequence: graph.node_seq(id)?.to_vec() })?;
            translation.insert(copy_id, id, false);
        }
    }

    for edge in graph.edges() {
        let a = id_to_idx[&edge.from];
        let b = id_to_idx[&edge.to];
        let ca = component_of[a];
        let cb = component_of[b];
        if ca == cb && cyclic[ca] {
            let advances = rank[a] >= rank[b];
            for layer in 0..=steps {
                let target_layer = if advances { layer + 1 } else { layer };
                if target_layer > steps {
                    continue;
                }
                dag.add_edge(Edge {
                    from: layer_id[&(a, layer)],
                    from_start: false,
                    to: layer_id[&(b, target_layer)],
                    to_end: false
                })?;
            }
        } else {
            // cross-component edges leave from every copy and enter at layer 0
            let from_layers = if cyclic[ca] { steps + 1 } else { 1 };
            for layer in 0..from_layers {
                dag.add_edge(Edge {
                    from: layer_id[&(a, layer)],
                    from_start: false,
                    to: layer_id[&(b, 0)],
                    to_end: false
                })?;
            }
        }
    }

    Ok((dag, translation))
}

/// One superbubble in a DAG: entry, exit, and every contained node id
/// (endpoints included).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Superbubble {
    pub entry: NodeId,
    pub exit: NodeId,
    pub contents: Vec<NodeId>
}

/// Finds superbubbles by frontier expansion from each entry candidate:
/// starting at `s`, nodes are visited once all their parents are visited; if
/// the frontier collapses to a single node `t` with nothing else pending,
/// `(s, t)` bounds a superbubble. Bubbles with no interior nodes are skipped.
/// # Arguments
/// * `graph` - a DAG in canonical orientation
pub fn superbubbles(graph: &VariationGraph) -> Vec<Superbubble> {
    let mut ids: Vec<NodeId> = graph.node_ids().collect();
    ids.sort_unstable();
    let id_to_idx: HashMap<NodeId, usize> = ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
    let n = ids.len();
    let mut successors: Vec<Vec<usize>> = vec![vec![]; n];
    let mut predecessors: Vec<Vec<usize>> = vec![vec![]; n];
    for edge in graph.edges() {
        successors[id_to_idx[&edge.from]].push(id_to_idx[&edge.to]);
        predecessors[id_to_idx[&edge.to]].push(id_to_idx[&edge.from]);
    }

    let mut bubbles: Vec<Superbubble> = vec![];
    let mut visited = BitVec::from_elem(n, false);
    let mut seen = BitVec::from_elem(n, false);

    for s in 0..n {
        if successors[s].len() < 2 {
            // a superbubble entry must branch
            continue;
        }
        visited.clear();
        seen.clear();
        let mut seen_count: usize = 0;
        let mut frontier: Vec<usize> = vec![s];
        let mut interior: Vec<usize> = vec![];
        let mut found: Option<usize> = None;

        while let Some(v) = frontier.pop() {
            visited.set(v, true);
            if seen[v] {
                seen.set(v, false);
                seen_count -= 1;
            }
            interior.push(v);
            if successors[v].is_empty() {
                // hit a tip, no exit can dominate it
                break;
            }
            let mut aborted = false;
            for &c in successors[v].iter() {
                if c == s {
                    // cycle back into the entry
                    aborted = true;
                    break;
                }
                if !seen[c] && !visited[c] {
                    seen.set(c, true);
                    seen_count += 1;
                }
                if predecessors[c].iter().all(|&p| visited[p]) && !visited[c] {
                    frontier.push(c);
                }
            }
            if aborted {
                break;
            }
            if frontier.len() == 1 && seen_count == 1 && seen[frontier[0]] {
                let t = frontier[0];
                // an edge from the exit back to the entry would leave the bubble
                if !successors[t].contains(&s) {
                    found = Some(t);
                }
                break;
            }
        }

        if let Some(t) = found {
            if interior.len() > 1 {
                // interior beyond the entry itself means real variation
                let mut contents: Vec<NodeId> = interior.iter().map(|&v| ids[v]).collect();
                contents.push(ids[t]);
                bubbles.push(Superbubble { entry: ids[s], exit: ids[t], contents });
            }
        }
    }

    bubbles
}

/// Finds variant sites by superbubble decomposition: unfold the bidirected
/// graph, flip doubly-reversed edges, dagify with a bounded unroll, detect
/// superbubbles, and translate everything back through the composed tables.
/// # Arguments
/// * `graph` - the augmented bidirected graph
/// * `unfold_max_length` - reverse-replication bound, in bases
/// * `dagify_steps` - cycle unroll bound
pub fn find_sites(graph: &VariationGraph, unfold_max_length: usize, dagify_steps: usize) -> Result<Vec<Site>, Box<dyn std::error::Error>> {
    let (mut unfolded, unfold_translation) = unfold(graph, unfold_max_length)?;
    unfolded.flip_doubly_reversed_edges();
    let (dag, dag_translation) = dagify(&unfolded, dagify_steps)?;
    let overall = dag_translation.compose(&unfold_translation)?;

    let bubbles = superbubbles(&dag);
    debug!("Superbubble scan found {} bubbles before translation", bubbles.len());

    let mut dedup: HashSet<(NodeTraversal, NodeTraversal)> = Default::default();
    let mut sites: Vec<Site> = vec![];
    for bubble in bubbles.into_iter() {
        let (start_id, start_backward) = overall.translate(bubble.entry)?;
        let (end_id, end_backward) = overall.translate(bubble.exit)?;
        let start = NodeTraversal::new(start_id, start_backward);
        let end = NodeTraversal::new(end_id, end_backward);
        if start == end {
            // unroll artifact collapsing onto a single oriented node
            continue;
        }
        if !dedup.insert((start, end)) {
            continue;
        }
        let mut contents: BTreeSet<NodeId> = BTreeSet::new();
        for id in bubble.contents.iter() {
            contents.insert(overall.translate(*id)?.0);
        }
        sites.push(Site::new(start, end, contents));
    }

    sites.sort_by_key(|s| (s.start.node, s.start.backward, s.end.node, s.end.backward));
    Ok(sites)
}
