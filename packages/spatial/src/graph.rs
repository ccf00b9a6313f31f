//! Queen contiguity graph over ADM2 units.
//!
//! Two units are neighbors when their boundaries share at least one
//! point: a common edge, a common vertex, or a vertex lying on the other
//! unit's edge. Adjacency comes from exact boundary intersection only;
//! polygons that are merely close never become neighbors.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use geo::{Intersects, Line, MultiPolygon};
use rstar::{AABB, Envelope as _, RTree, RTreeObject};
use serde::{Deserialize, Serialize};

use crate::{BoundaryFeature, GeometryError, SpatialError, compute_envelope};

/// A validated unit stored in the R-tree while building the graph.
struct GraphEntry {
    slot: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for GraphEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Ring segments of one unit, kept alongside its envelope.
struct Rings {
    code: String,
    envelope: AABB<[f64; 2]>,
    segments: Vec<Line<f64>>,
}

/// Symmetric adjacency over units, keyed by `adm2_code`.
///
/// Every unit handed to [`NeighborGraph::build`] is a node, including
/// units whose geometry failed validation (those have no neighbors).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborGraph {
    /// Fingerprint of the boundary source this graph was built from.
    pub fingerprint: String,
    neighbors: BTreeMap<String, BTreeSet<String>>,
}

/// Result of building a graph: the graph plus the units that were
/// excluded for bad geometry.
#[derive(Debug, Clone)]
pub struct GraphBuild {
    /// The adjacency graph.
    pub graph: NeighborGraph,
    /// Units excluded from adjacency tests.
    pub errors: Vec<GeometryError>,
}

impl NeighborGraph {
    /// Builds queen contiguity from unit polygons.
    #[must_use]
    pub fn build(features: &[BoundaryFeature], fingerprint: &str) -> GraphBuild {
        let mut neighbors: BTreeMap<String, BTreeSet<String>> = features
            .iter()
            .map(|f| (f.adm2_code.clone(), BTreeSet::new()))
            .collect();
        let mut errors = Vec::new();
        let mut rings = Vec::new();

        for feature in features {
            match feature.validated() {
                Ok(polygon) => rings.push(Rings {
                    code: feature.adm2_code.clone(),
                    envelope: compute_envelope(polygon),
                    segments: ring_segments(polygon),
                }),
                Err(e) => {
                    log::warn!("Excluding unit from neighbor graph: {e}");
                    errors.push(e);
                }
            }
        }

        let tree = RTree::bulk_load(
            rings
                .iter()
                .enumerate()
                .map(|(slot, r)| GraphEntry {
                    slot,
                    envelope: r.envelope,
                })
                .collect(),
        );

        let shared = shared_vertex_pairs(&rings);

        for (slot, unit) in rings.iter().enumerate() {
            for candidate in tree.locate_in_envelope_intersecting(&unit.envelope) {
                // Each unordered pair is tested once, from its lower slot.
                if candidate.slot <= slot {
                    continue;
                }
                let other = &rings[candidate.slot];
                let touching =
                    shared.contains(&(slot, candidate.slot)) || boundaries_touch(unit, other);
                if touching {
                    link(&mut neighbors, &unit.code, &other.code);
                }
            }
        }

        let graph = Self {
            fingerprint: fingerprint.to_string(),
            neighbors,
        };
        log::info!(
            "Built neighbor graph: {} units, {} edges, {} isolated, {} geometry errors",
            graph.len(),
            graph.edge_count(),
            graph.isolated().count(),
            errors.len()
        );

        GraphBuild { graph, errors }
    }

    /// Builds a graph directly from an adjacency list. Missing reverse
    /// edges are added so the result is symmetric.
    #[must_use]
    pub fn from_edges(
        fingerprint: &str,
        units: &[&str],
        edges: &[(&str, &str)],
    ) -> Self {
        let mut neighbors: BTreeMap<String, BTreeSet<String>> = units
            .iter()
            .map(|u| ((*u).to_string(), BTreeSet::new()))
            .collect();
        for (a, b) in edges {
            if a != b {
                link(&mut neighbors, a, b);
            }
        }
        Self {
            fingerprint: fingerprint.to_string(),
            neighbors,
        }
    }

    /// Neighbors of a unit. Unknown units have none.
    pub fn neighbors(&self, adm2_code: &str) -> impl Iterator<Item = &str> {
        self.neighbors
            .get(adm2_code)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Number of neighbors of a unit.
    #[must_use]
    pub fn degree(&self, adm2_code: &str) -> usize {
        self.neighbors.get(adm2_code).map_or(0, BTreeSet::len)
    }

    /// Whether the unit has no neighbors.
    #[must_use]
    pub fn is_isolated(&self, adm2_code: &str) -> bool {
        self.degree(adm2_code) == 0
    }

    /// Whether the unit is a node in the graph.
    #[must_use]
    pub fn contains(&self, adm2_code: &str) -> bool {
        self.neighbors.contains_key(adm2_code)
    }

    /// Units with no neighbors, in code order.
    pub fn isolated(&self) -> impl Iterator<Item = &str> {
        self.neighbors
            .iter()
            .filter(|(_, set)| set.is_empty())
            .map(|(code, _)| code.as_str())
    }

    /// All unit codes, in code order.
    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.neighbors.keys().map(String::as_str)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Number of undirected edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.neighbors.values().map(BTreeSet::len).sum::<usize>() / 2
    }

    /// Loads a graph previously written by [`Self::save`], returning
    /// `None` when the file doesn't exist or was built from a different
    /// boundary version.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the file exists but can't be read or
    /// parsed.
    pub fn load_cached(path: &Path, fingerprint: &str) -> Result<Option<Self>, SpatialError> {
        if !path.exists() {
            return Ok(None);
        }
        let body = std::fs::read_to_string(path)?;
        let graph: Self = serde_json::from_str(&body)?;
        if graph.fingerprint == fingerprint {
            Ok(Some(graph))
        } else {
            log::info!(
                "Cached neighbor graph is for boundary version {}, rebuilding",
                graph.fingerprint
            );
            Ok(None)
        }
    }

    /// Writes the graph as JSON so later runs can skip the build.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the file can't be written.
    pub fn save(&self, path: &Path) -> Result<(), SpatialError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn link(neighbors: &mut BTreeMap<String, BTreeSet<String>>, a: &str, b: &str) {
    neighbors
        .entry(a.to_string())
        .or_default()
        .insert(b.to_string());
    neighbors
        .entry(b.to_string())
        .or_default()
        .insert(a.to_string());
}

/// All segments of all rings (exterior and holes) of a polygon.
fn ring_segments(polygon: &MultiPolygon<f64>) -> Vec<Line<f64>> {
    polygon
        .0
        .iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
        .flat_map(geo::LineString::lines)
        .collect()
}

/// Pairs of units (by slot, lower first) that share an exact vertex.
///
/// Administrative boundaries are usually digitized with shared vertices,
/// so this settles most adjacencies without any segment tests.
fn shared_vertex_pairs(rings: &[Rings]) -> BTreeSet<(usize, usize)> {
    let mut owners: HashMap<(u64, u64), Vec<usize>> = HashMap::new();
    for (slot, unit) in rings.iter().enumerate() {
        for segment in &unit.segments {
            let key = (segment.start.x.to_bits(), segment.start.y.to_bits());
            let slots = owners.entry(key).or_default();
            if slots.last() != Some(&slot) {
                slots.push(slot);
            }
        }
    }

    let mut pairs = BTreeSet::new();
    for slots in owners.values() {
        for (i, a) in slots.iter().enumerate() {
            for b in &slots[i + 1..] {
                if a != b {
                    pairs.insert((*a.min(b), *a.max(b)));
                }
            }
        }
    }
    pairs
}

/// Exact boundary intersection test, restricted to the segments lying in
/// the overlap of both envelopes.
fn boundaries_touch(a: &Rings, b: &Rings) -> bool {
    let Some(overlap) = envelope_overlap(&a.envelope, &b.envelope) else {
        return false;
    };

    let near = |segments: &[Line<f64>]| -> Vec<Line<f64>> {
        segments
            .iter()
            .filter(|l| segment_envelope(l).intersects(&overlap))
            .copied()
            .collect()
    };
    let near_a = near(&a.segments);
    if near_a.is_empty() {
        return false;
    }
    let near_b = near(&b.segments);

    near_a
        .iter()
        .any(|la| near_b.iter().any(|lb| la.intersects(lb)))
}

fn segment_envelope(line: &Line<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([line.start.x, line.start.y], [line.end.x, line.end.y])
}

fn envelope_overlap(a: &AABB<[f64; 2]>, b: &AABB<[f64; 2]>) -> Option<AABB<[f64; 2]>> {
    let lower = [a.lower()[0].max(b.lower()[0]), a.lower()[1].max(b.lower()[1])];
    let upper = [a.upper()[0].min(b.upper()[0]), a.upper()[1].min(b.upper()[1])];
    if lower[0] > upper[0] || lower[1] > upper[1] {
        None
    } else {
        Some(AABB::from_corners(lower, upper))
    }
}
