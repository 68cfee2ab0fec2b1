
use crate::data_types::graph::{NodeId, NodeSide, NodeTraversal, VariationGraph};
use crate::data_types::locus::Site;

use log::debug;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use simple_error::bail;
use std::collections::BTreeSet;

/// One bubble in the tree. Bubbles form an arena-backed tree: parents and
/// children are indices into the owning `BubbleTree`, never pointers.
#[derive(Clone, Debug)]
pub struct Bubble {
    pub start: NodeTraversal,
    pub end: NodeTraversal,
    /// this bubble's own nodes; cumulative after the bubble-up pass
    pub contents: BTreeSet<NodeId>,
    pub parent: Option<usize>,
    pub children: Vec<usize>
}

/// A rooted tree of nested bubbles. The root spans the whole graph between the
/// reference path's endpoints and is never emitted as a site.
#[derive(Clone, Debug)]
pub struct BubbleTree {
    bubbles: Vec<Bubble>,
    root: usize
}

impl BubbleTree {
    pub fn root(&self) -> &Bubble {
        &self.bubbles[self.root]
    }

    /// Pushes every bubble's node set up into its ancestors, so each bubble's
    /// contents become the union of its own and all its descendants'. Scoring
    /// over a parent site then captures all enclosed variation.
    pub fn bubble_up(&mut self) {
        let order = self.postorder();
        for index in order {
            if let Some(parent) = self.bubbles[index].parent {
                let contents = self.bubbles[index].contents.clone();
                self.bubbles[parent].contents.extend(contents);
            }
        }
    }

    fn postorder(&self) -> Vec<usize> {
        let mut order = vec![];
        let mut stack = vec![(self.root, false)];
        while let Some((index, expanded)) = stack.pop() {
            if expanded {
                order.push(index);
            } else {
                stack.push((index, true));
                for &child in self.bubbles[index].children.iter().rev() {
                    stack.push((child, false));
                }
            }
        }
        order
    }

    /// Visits every bubble in preorder, children in stored order.
    pub fn for_each_preorder<F: FnMut(usize, &Bubble)>(&self, mut visit: F) {
        let mut stack = vec![self.root];
        while let Some(index) = stack.pop() {
            visit(index, &self.bubbles[index]);
            for &child in self.bubbles[index].children.iter().rev() {
                stack.push(child);
            }
        }
    }
}

/// The adjacency (biedged) view of the variation graph: every sequence node
/// becomes its two sides joined by a black edge, and every graph edge becomes
/// a grey edge between the sides it attaches. The cactus analysis runs over
/// this undirected multigraph, so bubble endpoints come out as node sides.
struct BiedgedGraph {
    /// sorted node ids; node at position i owns side vertices 2i (left)
    /// and 2i + 1 (right)
    node_ids: Vec<NodeId>,
    /// undirected edges; the first `node_ids.len()` are the black edges
    edges: Vec<(usize, usize)>,
    /// vertex -> (edge index, other endpoint)
    adjacency: Vec<Vec<(usize, usize)>>
}

impl BiedgedGraph {
    fn new(graph: &VariationGraph) -> BiedgedGraph {
        let mut node_ids: Vec<NodeId> = graph.node_ids().collect();
        node_ids.sort_unstable();
        let index_of: HashMap<NodeId, usize> = node_ids.iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        let mut edges: Vec<(usize, usize)> = (0..node_ids.len())
            .map(|i| (2 * i, 2 * i + 1))
            .collect();
        for edge in graph.edges() {
            let (a, b) = edge.sides();
            let u = 2 * index_of[&a.node] + a.is_end as usize;
            let v = 2 * index_of[&b.node] + b.is_end as usize;
            if u == v {
                // a side looped onto itself reverses in place and carries no
                // cut structure to contract
                continue;
            }
            edges.push((u, v));
        }

        let mut adjacency: Vec<Vec<(usize, usize)>> = vec![vec![]; 2 * node_ids.len()];
        for (edge_index, &(u, v)) in edges.iter().enumerate() {
            adjacency[u].push((edge_index, v));
            adjacency[v].push((edge_index, u));
        }
        BiedgedGraph { node_ids, edges, adjacency }
    }

    fn vertex_count(&self) -> usize {
        2 * self.node_ids.len()
    }

    fn side(&self, vertex: usize) -> NodeSide {
        NodeSide {
            node: self.node_ids[vertex / 2],
            is_end: vertex % 2 == 1
        }
    }

    fn side_vertex(&self, side: NodeSide) -> Option<usize> {
        self.node_ids.binary_search(&side.node)
            .ok()
            .map(|i| 2 * i + side.is_end as usize)
    }
}

const UNSET: usize = usize::MAX;

/// Marks the bridges of an undirected multigraph, optionally pretending one
/// edge has been removed. Parallel edges are distinguished by edge index, so
/// only the exact edge used to enter a vertex is excluded from back edges.
fn find_bridges(
    vertex_count: usize,
    edge_count: usize,
    adjacency: &[Vec<(usize, usize)>],
    skip_edge: Option<usize>
) -> Vec<bool> {
    let mut disc: Vec<usize> = vec![UNSET; vertex_count];
    let mut low: Vec<usize> = vec![0; vertex_count];
    let mut is_bridge: Vec<bool> = vec![false; edge_count];
    let mut timer: usize = 0;

    for root in 0..vertex_count {
        if disc[root] != UNSET {
            continue;
        }
        disc[root] = timer;
        low[root] = timer;
        timer += 1;
        // (vertex, edge used to enter, next adjacency cursor)
        let mut work: Vec<(usize, usize, usize)> = vec![(root, UNSET, 0)];

        while let Some(&(v, entry, cursor)) = work.last() {
            if cursor < adjacency[v].len() {
                work.last_mut().unwrap().2 += 1;
                let (edge_index, w) = adjacency[v][cursor];
                if Some(edge_index) == skip_edge || edge_index == entry {
                    continue;
                }
                if disc[w] == UNSET {
                    disc[w] = timer;
                    low[w] = timer;
                    timer += 1;
                    work.push((w, edge_index, 0));
                } else {
                    low[v] = low[v].min(disc[w]);
                }
            } else {
                work.pop();
                if let Some(&(parent, _, _)) = work.last() {
                    low[parent] = low[parent].min(low[v]);
                    if low[v] > disc[parent] {
                        is_bridge[entry] = true;
                    }
                }
            }
        }
    }
    is_bridge
}

/// Labels connected components over the edges passing the filter.
fn component_labels(
    vertex_count: usize,
    adjacency: &[Vec<(usize, usize)>],
    edge_ok: impl Fn(usize) -> bool
) -> Vec<usize> {
    let mut labels: Vec<usize> = vec![UNSET; vertex_count];
    let mut next_label: usize = 0;
    for start in 0..vertex_count {
        if labels[start] != UNSET {
            continue;
        }
        labels[start] = next_label;
        let mut queue: Vec<usize> = vec![start];
        while let Some(v) = queue.pop() {
            for &(edge_index, w) in adjacency[v].iter() {
                if edge_ok(edge_index) && labels[w] == UNSET {
                    labels[w] = next_label;
                    queue.push(w);
                }
            }
        }
        next_label += 1;
    }
    labels
}

/// 2-edge-connected component labels, optionally with one edge removed.
fn two_edge_connected_labels(
    vertex_count: usize,
    edge_count: usize,
    adjacency: &[Vec<(usize, usize)>],
    skip_edge: Option<usize>
) -> Vec<usize> {
    let bridges = find_bridges(vertex_count, edge_count, adjacency, skip_edge);
    component_labels(vertex_count, adjacency, |e| !bridges[e] && Some(e) != skip_edge)
}

/// 3-edge-connected component classes by partition refinement: two vertices
/// are 3-edge-connected exactly when no single edge removal can bridge-apart
/// their 2-edge-connected component, so start from the 2ecc partition and
/// refine it by the 2ecc labels of every one-edge-removed graph.
fn three_edge_connected_classes(
    vertex_count: usize,
    edge_count: usize,
    adjacency: &[Vec<(usize, usize)>]
) -> (Vec<usize>, usize) {
    let baseline_bridges = find_bridges(vertex_count, edge_count, adjacency, None);
    let mut classes = two_edge_connected_labels(vertex_count, edge_count, adjacency, None);

    for removed in 0..edge_count {
        if baseline_bridges[removed] {
            // a bridge is on no cycle; removing it cannot split any 2ecc
            continue;
        }
        let labels = two_edge_connected_labels(vertex_count, edge_count, adjacency, Some(removed));
        let mut intern: HashMap<(usize, usize), usize> = Default::default();
        for v in 0..vertex_count {
            let key = (classes[v], labels[v]);
            let fresh = intern.len();
            classes[v] = *intern.entry(key).or_insert(fresh);
        }
    }

    // densify the final labels
    let mut remap: HashMap<usize, usize> = Default::default();
    for v in 0..vertex_count {
        let fresh = remap.len();
        classes[v] = *remap.entry(classes[v]).or_insert(fresh);
    }
    let class_count = remap.len();
    (classes, class_count)
}

/// The cactus graph: the biedged graph with every 3-edge-connected component
/// contracted to a single vertex. In the result every edge lies on at most
/// one simple cycle, and those cycles are exactly its biconnected blocks.
struct CactusGraph {
    class_of: Vec<usize>,
    class_members: Vec<Vec<usize>>,
    /// (contracted endpoint of u, contracted endpoint of v, biedged edge index)
    edges: Vec<(usize, usize, usize)>,
    adjacency: Vec<Vec<(usize, usize)>>
}

impl CactusGraph {
    fn new(biedged: &BiedgedGraph) -> CactusGraph {
        let (class_of, class_count) = three_edge_connected_classes(
            biedged.vertex_count(), biedged.edges.len(), &biedged.adjacency
        );

        let mut class_members: Vec<Vec<usize>> = vec![vec![]; class_count];
        for (vertex, &class) in class_of.iter().enumerate() {
            class_members[class].push(vertex);
        }

        let mut edges: Vec<(usize, usize, usize)> = vec![];
        for (edge_index, &(u, v)) in biedged.edges.iter().enumerate() {
            let (cu, cv) = (class_of[u], class_of[v]);
            if cu != cv {
                // edges inside a contracted component disappear
                edges.push((cu, cv, edge_index));
            }
        }

        let mut adjacency: Vec<Vec<(usize, usize)>> = vec![vec![]; class_count];
        for (cactus_edge, &(cu, cv, _)) in edges.iter().enumerate() {
            adjacency[cu].push((cactus_edge, cv));
            adjacency[cv].push((cactus_edge, cu));
        }
        CactusGraph { class_of, class_members, edges, adjacency }
    }

    fn vertex_count(&self) -> usize {
        self.class_members.len()
    }
}

/// Splits an undirected multigraph into biconnected blocks (edge sets).
/// On a cactus, every block with two or more edges is one simple cycle.
fn biconnected_blocks(
    vertex_count: usize,
    edge_count: usize,
    adjacency: &[Vec<(usize, usize)>]
) -> Vec<Vec<usize>> {
    let mut disc: Vec<usize> = vec![UNSET; vertex_count];
    let mut low: Vec<usize> = vec![0; vertex_count];
    let mut edge_taken: Vec<bool> = vec![false; edge_count];
    let mut edge_stack: Vec<usize> = vec![];
    let mut blocks: Vec<Vec<usize>> = vec![];
    let mut timer: usize = 0;

    for root in 0..vertex_count {
        if disc[root] != UNSET {
            continue;
        }
        disc[root] = timer;
        low[root] = timer;
        timer += 1;
        let mut work: Vec<(usize, usize, usize)> = vec![(root, UNSET, 0)];

        while let Some(&(v, entry, cursor)) = work.last() {
            if cursor < adjacency[v].len() {
                work.last_mut().unwrap().2 += 1;
                let (edge_index, w) = adjacency[v][cursor];
                if edge_index == entry {
                    continue;
                }
                if disc[w] == UNSET {
                    edge_taken[edge_index] = true;
                    edge_stack.push(edge_index);
                    disc[w] = timer;
                    low[w] = timer;
                    timer += 1;
                    work.push((w, edge_index, 0));
                } else {
                    if !edge_taken[edge_index] {
                        edge_taken[edge_index] = true;
                        edge_stack.push(edge_index);
                    }
                    low[v] = low[v].min(disc[w]);
                }
            } else {
                work.pop();
                if let Some(&(parent, _, _)) = work.last() {
                    low[parent] = low[parent].min(low[v]);
                    if low[v] >= disc[parent] {
                        // the tree edge into v closes off one block
                        let mut block: Vec<usize> = vec![];
                        loop {
                            let edge_index = edge_stack.pop().unwrap();
                            block.push(edge_index);
                            if edge_index == entry {
                                break;
                            }
                        }
                        blocks.push(block);
                    }
                }
            }
        }
    }
    blocks
}

/// The oriented endpoints of the reference path, used to root the tree.
/// # Errors
/// * if the path is missing or empty
fn reference_endpoints(graph: &VariationGraph, ref_path_name: &str) -> Result<(NodeTraversal, NodeTraversal), Box<dyn std::error::Error>> {
    let path_index = match graph.path_index(ref_path_name) {
        Some(pi) => pi,
        None => bail!("reference path {:?} is not embedded in the graph", ref_path_name)
    };
    let mappings = graph.path_mappings(path_index);
    if mappings.is_empty() {
        bail!("reference path {:?} is empty", ref_path_name);
    }
    Ok((
        mappings.first().unwrap().traversal(),
        mappings.last().unwrap().traversal()
    ))
}

/// A candidate bubble assembled from one or more parallel cactus cycles that
/// share the same endpoint pair.
struct CycleGroup {
    start: NodeTraversal,
    end: NodeTraversal,
    contents: BTreeSet<NodeId>,
    /// smallest member block, used to walk toward the root
    first_block: usize
}

/// Finds variant sites via the cactus bubble tree: build the biedged
/// adjacency graph, contract all 3-edge-connected components (bridge-analysis
/// partition refinement), take the simple cycles of the resulting cactus as
/// bubbles, organize them into a tree rooted at the reference endpoints, push
/// nested contents up into parents, and emit every non-root bubble in
/// preorder.
/// # Arguments
/// * `graph` - the augmented bidirected graph
/// * `ref_path_name` - the embedded path whose endpoints root the tree
/// # Errors
/// * if the reference path is missing or empty
pub fn find_sites_with_bubble_tree(
    graph: &VariationGraph,
    ref_path_name: &str
) -> Result<Vec<Site>, Box<dyn std::error::Error>> {
    let (source, sink) = reference_endpoints(graph, ref_path_name)?;
    let ref_path_index = graph.path_index(ref_path_name).unwrap();
    let mut ref_position: HashMap<NodeId, usize> = Default::default();
    for (position, mapping) in graph.path_mappings(ref_path_index).iter().enumerate() {
        ref_position.entry(mapping.node_id).or_insert(position);
    }

    let biedged = BiedgedGraph::new(graph);
    let cactus = CactusGraph::new(&biedged);
    let blocks = biconnected_blocks(cactus.vertex_count(), cactus.edges.len(), &cactus.adjacency);
    debug!(
        "Cactus: {} vertices from {} sides, {} blocks",
        cactus.vertex_count(), biedged.vertex_count(), blocks.len()
    );

    // orders candidate endpoint sides along the reference, then by node id
    let side_key = |vertex: usize| {
        let side = biedged.side(vertex);
        (
            ref_position.get(&side.node).copied().unwrap_or(usize::MAX),
            side.node,
            vertex
        )
    };

    // turn each cycle block into a bubble candidate
    let mut groups: Vec<CycleGroup> = vec![];
    let mut group_lookup: HashMap<(NodeTraversal, NodeTraversal), usize> = Default::default();
    let mut block_group: Vec<Option<usize>> = vec![None; blocks.len()];

    for (block_index, block) in blocks.iter().enumerate() {
        if block.len() < 2 {
            // a lone edge is a bridge, not a cycle
            continue;
        }
        let block_edges: HashSet<usize> = block.iter().copied().collect();
        let mut block_vertices: BTreeSet<usize> = BTreeSet::new();
        for &cactus_edge in block.iter() {
            let (cu, cv, _) = cactus.edges[cactus_edge];
            block_vertices.insert(cu);
            block_vertices.insert(cv);
        }

        // a vertex attaches the cycle to the rest of the cactus when it has
        // any incident edge outside the block
        let attaches = |cv: usize| {
            cactus.adjacency[cv].iter().any(|&(edge, _)| !block_edges.contains(&edge))
        };
        let mut candidates: BTreeSet<usize> = BTreeSet::new();
        for &cactus_edge in block.iter() {
            let (cu, cv, biedged_edge) = cactus.edges[cactus_edge];
            let (bu, bv) = biedged.edges[biedged_edge];
            if attaches(cu) {
                candidates.insert(bu);
            }
            if attaches(cv) {
                candidates.insert(bv);
            }
        }
        if candidates.is_empty() {
            // an isolated cycle component: every side is a candidate
            for &cactus_edge in block.iter() {
                let (_, _, biedged_edge) = cactus.edges[cactus_edge];
                let (bu, bv) = biedged.edges[biedged_edge];
                candidates.insert(bu);
                candidates.insert(bv);
            }
        }
        if candidates.len() < 2 {
            debug!("Cycle block {} has no usable endpoint pair, skipping", block_index);
            continue;
        }

        let start_side_vertex = candidates.iter().copied().min_by_key(|&v| side_key(v)).unwrap();
        let end_side_vertex = candidates.iter().copied().max_by_key(|&v| side_key(v)).unwrap();
        let start_side = biedged.side(start_side_vertex);
        let end_side = biedged.side(end_side_vertex);
        // the start exits through its side, the end is entered through its side
        let start = NodeTraversal::new(start_side.node, !start_side.is_end);
        let end = NodeTraversal::new(end_side.node, end_side.is_end);
        if start == end {
            debug!("Cycle block {} collapses onto a single oriented node, skipping", block_index);
            continue;
        }

        let mut contents: BTreeSet<NodeId> = BTreeSet::new();
        for &cv in block_vertices.iter() {
            for &member in cactus.class_members[cv].iter() {
                contents.insert(biedged.side(member).node);
            }
        }

        // parallel arms of one site come out as separate cycles sharing the
        // endpoint pair; merge them into a single bubble
        match group_lookup.get(&(start, end)) {
            Some(&group_index) => {
                groups[group_index].contents.extend(contents);
                block_group[block_index] = Some(group_index);
            },
            None => {
                let group_index = groups.len();
                group_lookup.insert((start, end), group_index);
                block_group[block_index] = Some(group_index);
                groups.push(CycleGroup { start, end, contents, first_block: block_index });
            }
        }
    }

    // block-cut walk from the reference source, so every cycle knows which
    // cycle it nests inside
    let mut vertex_blocks: Vec<Vec<usize>> = vec![vec![]; cactus.vertex_count()];
    for (block_index, block) in blocks.iter().enumerate() {
        let mut seen: BTreeSet<usize> = BTreeSet::new();
        for &cactus_edge in block.iter() {
            let (cu, cv, _) = cactus.edges[cactus_edge];
            seen.insert(cu);
            seen.insert(cv);
        }
        for cv in seen {
            vertex_blocks[cv].push(block_index);
        }
    }

    let mut parent_block: Vec<Option<usize>> = vec![None; blocks.len()];
    let mut visited_block: Vec<bool> = vec![false; blocks.len()];
    let mut bfs_order: Vec<usize> = vec![];
    let source_class = biedged.side_vertex(source.entry_side())
        .map(|vertex| cactus.class_of[vertex]);
    let root_block = source_class
        .and_then(|class| vertex_blocks[class].first().copied());
    if let Some(first) = root_block {
        bfs_order.push(first);
        visited_block[first] = true;
    }
    for start_block in 0..blocks.len() {
        if !visited_block[start_block] {
            bfs_order.push(start_block);
            visited_block[start_block] = true;
        }
        // drain everything reachable before seeding the next component
        let mut cursor = bfs_order.len() - 1;
        while cursor < bfs_order.len() {
            let current = bfs_order[cursor];
            cursor += 1;
            let mut touched: BTreeSet<usize> = BTreeSet::new();
            for &cactus_edge in blocks[current].iter() {
                let (cu, cv, _) = cactus.edges[cactus_edge];
                touched.insert(cu);
                touched.insert(cv);
            }
            for cv in touched {
                for &next_block in vertex_blocks[cv].iter() {
                    if !visited_block[next_block] {
                        visited_block[next_block] = true;
                        parent_block[next_block] = Some(current);
                        bfs_order.push(next_block);
                    }
                }
            }
        }
    }

    // resolve each group's parent group by walking up the block-cut tree
    let group_parent: Vec<Option<usize>> = groups.iter()
        .enumerate()
        .map(|(group_index, group)| {
            let mut cursor = parent_block[group.first_block];
            while let Some(block_index) = cursor {
                if let Some(other) = block_group[block_index] {
                    if other != group_index {
                        return Some(other);
                    }
                }
                cursor = parent_block[block_index];
            }
            None
        })
        .collect();

    // assemble the arena: synthetic root first, groups in a stable order
    let mut order: Vec<usize> = (0..groups.len()).collect();
    order.sort_by_key(|&g| {
        let group = &groups[g];
        (group.start.node, group.start.backward, group.end.node, group.end.backward)
    });
    let mut arena_index: Vec<usize> = vec![0; groups.len()];
    for (position, &g) in order.iter().enumerate() {
        arena_index[g] = position + 1;
    }

    let mut bubbles: Vec<Bubble> = vec![Bubble {
        start: source,
        end: sink,
        contents: graph.node_ids().collect(),
        parent: None,
        children: vec![]
    }];
    for &g in order.iter() {
        let group = &groups[g];
        let parent = match group_parent[g] {
            Some(parent_group) => arena_index[parent_group],
            None => 0
        };
        bubbles.push(Bubble {
            start: group.start,
            end: group.end,
            contents: group.contents.clone(),
            parent: Some(parent),
            children: vec![]
        });
    }
    for index in 1..bubbles.len() {
        let parent = bubbles[index].parent.unwrap();
        bubbles[parent].children.push(index);
    }

    let mut tree = BubbleTree { bubbles, root: 0 };
    tree.bubble_up();

    let mut sites: Vec<Site> = vec![];
    tree.for_each_preorder(|index, bubble| {
        if index != tree.root {
            sites.push(Site::new(bubble.start, bubble.end, bubble.contents.clone()));
        }
    });
    debug!("Bubble tree produced {} sites", sites.len());
    Ok(sites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::graph::{Edge, Mapping, Node};

    fn add_nodes(graph: &mut VariationGraph, specs: &[(NodeId, &str)]) {
        for &(id, seq) in specs.iter() {
            graph.add_node(Node { id, sequence: seq.as_bytes().to_vec() }).unwrap();
        }
    }

    fn forward_edge(graph: &mut VariationGraph, from: NodeId, to: NodeId) {
        graph.add_edge(Edge { from, from_start: false, to, to_end: false }).unwrap();
    }

    fn embed_ref(graph: &mut VariationGraph, nodes: &[NodeId]) {
        let mappings: Vec<Mapping> = nodes.iter()
            .map(|&id| Mapping::full(id, false, graph.node_seq(id).unwrap().len()))
            .collect();
        graph.embed_path("ref", mappings).unwrap();
    }

    /// 1 -> {2 | 3} -> 4, a single SNP bubble with the reference through 2.
    fn snp_graph() -> VariationGraph {
        let mut graph = VariationGraph::new();
        add_nodes(&mut graph, &[(1, "ACA"), (2, "G"), (3, "T"), (4, "CTC")]);
        forward_edge(&mut graph, 1, 2);
        forward_edge(&mut graph, 1, 3);
        forward_edge(&mut graph, 2, 4);
        forward_edge(&mut graph, 3, 4);
        embed_ref(&mut graph, &[1, 2, 4]);
        graph
    }

    /// Outer bubble 1..6 with an inner SNP bubble 2..5 on one branch, plus a
    /// reference path running straight through the inner branch.
    fn nested_graph() -> VariationGraph {
        let mut graph = VariationGraph::new();
        add_nodes(&mut graph, &[
            (1, "AA"), (2, "C"), (3, "G"), (4, "T"), (5, "C"), (6, "AA"), (7, "GGGG")
        ]);
        for (from, to) in [(1, 2), (2, 3), (2, 4), (3, 5), (4, 5), (5, 6), (1, 7), (7, 6)] {
            forward_edge(&mut graph, from, to);
        }
        embed_ref(&mut graph, &[1, 2, 3, 5, 6]);
        graph
    }

    #[test]
    fn test_snp_single_site() {
        let graph = snp_graph();
        let sites = find_sites_with_bubble_tree(&graph, "ref").unwrap();
        assert_eq!(sites.len(), 1);
        let site = &sites[0];
        assert_eq!(site.start, NodeTraversal::new(1, false));
        assert_eq!(site.end, NodeTraversal::new(4, false));
        assert_eq!(site.contents.len(), 4);
    }

    #[test]
    fn test_deletion_site() {
        // 1 -> 2 -> 3 plus a deletion edge 1 -> 3
        let mut graph = VariationGraph::new();
        add_nodes(&mut graph, &[(1, "AC"), (2, "GGG"), (3, "TA")]);
        forward_edge(&mut graph, 1, 2);
        forward_edge(&mut graph, 2, 3);
        forward_edge(&mut graph, 1, 3);
        embed_ref(&mut graph, &[1, 2, 3]);

        let sites = find_sites_with_bubble_tree(&graph, "ref").unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].start, NodeTraversal::new(1, false));
        assert_eq!(sites[0].end, NodeTraversal::new(3, false));
        assert_eq!(sites[0].contents.len(), 3);
    }

    #[test]
    fn test_bubble_tree_sites() {
        let graph = nested_graph();
        let sites = find_sites_with_bubble_tree(&graph, "ref").unwrap();
        assert_eq!(sites.len(), 2);

        // preorder: the outer bubble comes before the one nested inside it
        assert_eq!(sites[0].start.node, 1);
        assert_eq!(sites[0].end.node, 6);
        assert_eq!(sites[1].start.node, 2);
        assert_eq!(sites[1].end.node, 5);

        // the two inner arms are parallel cactus cycles merged into one site
        assert_eq!(sites[1].contents, [2, 3, 4, 5].into_iter().collect());
        // after bubbling up, the parent holds the union of the nest
        assert!(sites[1].contents.is_subset(&sites[0].contents));
        assert_eq!(sites[0].contents.len(), 7);
    }

    #[test]
    fn test_bubble_tree_missing_reference() {
        let graph = snp_graph();
        assert!(find_sites_with_bubble_tree(&graph, "nope").is_err());
    }

    #[test]
    fn test_chain_has_no_sites() {
        let mut graph = VariationGraph::new();
        add_nodes(&mut graph, &[(1, "A"), (2, "C"), (3, "G")]);
        forward_edge(&mut graph, 1, 2);
        forward_edge(&mut graph, 2, 3);
        embed_ref(&mut graph, &[1, 2, 3]);
        let sites = find_sites_with_bubble_tree(&graph, "ref").unwrap();
        assert!(sites.is_empty());
    }

    #[test]
    fn test_three_edge_connected_contraction() {
        // in the nested graph, the right side of node 2 and the left side of
        // node 5 have three edge-disjoint routes between them (both arms plus
        // the outer detour), so the contraction must merge exactly those two
        let graph = nested_graph();
        let biedged = BiedgedGraph::new(&graph);
        let (classes, _count) = three_edge_connected_classes(
            biedged.vertex_count(), biedged.edges.len(), &biedged.adjacency
        );

        let vertex = |node: NodeId, is_end: bool| {
            biedged.side_vertex(NodeSide { node, is_end }).unwrap()
        };
        assert_eq!(classes[vertex(2, true)], classes[vertex(5, false)]);
        assert_ne!(classes[vertex(2, true)], classes[vertex(2, false)]);
        assert_ne!(classes[vertex(1, true)], classes[vertex(6, false)]);
        assert_ne!(classes[vertex(3, false)], classes[vertex(2, true)]);
    }

    #[test]
    fn test_bridge_detection() {
        let graph = snp_graph();
        let biedged = BiedgedGraph::new(&graph);
        let bridges = find_bridges(
            biedged.vertex_count(), biedged.edges.len(), &biedged.adjacency, None
        );
        // the black edges of the anchor nodes dangle off the cycle; the black
        // edges of the SNP arms sit on it
        let black_of = |node: NodeId| {
            biedged.side_vertex(NodeSide { node, is_end: false }).unwrap() / 2
        };
        assert!(bridges[black_of(1)]);
        assert!(bridges[black_of(4)]);
        assert!(!bridges[black_of(2)]);
        assert!(!bridges[black_of(3)]);
    }

    #[test]
    fn test_bubble_up_unions_into_parent() {
        let root = Bubble {
            start: NodeTraversal::new(1, false),
            end: NodeTraversal::new(6, false),
            contents: [1, 6].into_iter().collect(),
            parent: None,
            children: vec![1]
        };
        let child = Bubble {
            start: NodeTraversal::new(2, false),
            end: NodeTraversal::new(5, false),
            contents: (2..=5).collect(),
            parent: Some(0),
            children: vec![]
        };
        let mut tree = BubbleTree { bubbles: vec![root, child], root: 0 };
        tree.bubble_up();
        assert_eq!(tree.root().contents.len(), 6);
    }
}
