//! Core mesh data types.

use nalgebra::{Point3, Vector3};

use crate::error::{FemError, FemResult};

/// Kind of a mesh element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ElementKind {
    /// Linear surface triangle (3 nodes).
    Triangle,
    /// Linear volume tetrahedron (4 nodes).
    Tetrahedron,
}

impl ElementKind {
    /// Number of nodes per element of this kind.
    #[inline]
    pub fn node_count(&self) -> usize {
        match self {
            ElementKind::Triangle => 3,
            ElementKind::Tetrahedron => 4,
        }
    }
}

/// One mesh cell as 0-based indices into the node array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Element {
    /// Surface triangle.
    Triangle([u32; 3]),
    /// Volume tetrahedron.
    Tetrahedron([u32; 4]),
}

impl Element {
    /// Build an element from a raw index tuple.
    ///
    /// `element_index` is only used for error reporting.
    pub fn from_indices(element_index: usize, indices: &[u32]) -> FemResult<Self> {
        match *indices {
            [a, b, c] => Ok(Element::Triangle([a, b, c])),
            [a, b, c, d] => Ok(Element::Tetrahedron([a, b, c, d])),
            _ => Err(FemError::wrong_cardinality(element_index, indices.len())),
        }
    }

    /// Kind of this element.
    #[inline]
    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Triangle(_) => ElementKind::Triangle,
            Element::Tetrahedron(_) => ElementKind::Tetrahedron,
        }
    }

    /// Node indices of this element.
    #[inline]
    pub fn node_indices(&self) -> &[u32] {
        match self {
            Element::Triangle(idx) => idx,
            Element::Tetrahedron(idx) => idx,
        }
    }
}

/// An unstructured mesh of triangles and/or tetrahedra.
///
/// Produced by the upstream tetrahedralization step and treated as read-only
/// by every pass in this crate. Coordinates share the physical space of the
/// source image (typically millimeters).
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    /// Node coordinates.
    pub nodes: Vec<Point3<f64>>,

    /// Elements as indices into `nodes`.
    pub elements: Vec<Element>,
}

impl Mesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mesh from raw node coordinates and index tuples.
    ///
    /// Fails on the first tuple that has neither 3 nor 4 entries. Index range
    /// checks happen in [`crate::validate::validate_mesh_geometry`].
    pub fn from_connectivity(nodes: Vec<Point3<f64>>, connectivity: &[Vec<u32>]) -> FemResult<Self> {
        let elements = connectivity
            .iter()
            .enumerate()
            .map(|(i, indices)| Element::from_indices(i, indices))
            .collect::<FemResult<Vec<_>>>()?;
        Ok(Self { nodes, elements })
    }

    /// Number of nodes.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of elements.
    #[inline]
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Check if mesh has no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Count elements per kind as `(triangles, tetrahedra)`.
    pub fn kind_counts(&self) -> (usize, usize) {
        self.elements
            .iter()
            .fold((0, 0), |(tri, tet), e| match e.kind() {
                ElementKind::Triangle => (tri + 1, tet),
                ElementKind::Tetrahedron => (tri, tet + 1),
            })
    }

    /// Compute the axis-aligned bounding box of the nodes.
    /// Returns (min_corner, max_corner) or None if there are no nodes.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = *self.nodes.first()?;
        let mut min = first;
        let mut max = first;

        for p in &self.nodes[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }

        Some((min, max))
    }

    /// Resolve one element's node coordinates.
    ///
    /// Returns `InvalidNodeIndex` if the element references a missing node.
    pub fn geometry(&self, element_index: usize) -> FemResult<ElementGeometry> {
        let element = self.elements.get(element_index).ok_or_else(|| {
            FemError::invalid_params(
                "element_index",
                format!(
                    "element {} requested, mesh has {} elements",
                    element_index,
                    self.elements.len()
                ),
            )
        })?;

        let node = |idx: u32| -> FemResult<Point3<f64>> {
            self.nodes
                .get(idx as usize)
                .copied()
                .ok_or_else(|| FemError::invalid_node_index(element_index, idx, self.nodes.len()))
        };

        Ok(match *element {
            Element::Triangle([a, b, c]) => {
                ElementGeometry::Triangle(Triangle::new(node(a)?, node(b)?, node(c)?))
            }
            Element::Tetrahedron([a, b, c, d]) => ElementGeometry::Tetrahedron(Tetrahedron::new(
                node(a)?,
                node(b)?,
                node(c)?,
                node(d)?,
            )),
        })
    }

    /// Sum of tetrahedron volumes.
    pub fn total_volume(&self) -> f64 {
        (0..self.element_count())
            .filter_map(|i| match self.geometry(i) {
                Ok(ElementGeometry::Tetrahedron(tet)) => Some(tet.volume()),
                _ => None,
            })
            .sum()
    }
}

/// Minimum, maximum and mean edge length of one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl EdgeStats {
    /// Summarize a non-empty set of edge lengths.
    pub fn from_lengths(lengths: &[f64]) -> Self {
        let mut min = f64::INFINITY;
        let mut max = 0.0_f64;
        let mut sum = 0.0;
        for &l in lengths {
            min = min.min(l);
            max = max.max(l);
            sum += l;
        }
        Self {
            min,
            max,
            mean: sum / lengths.len() as f64,
        }
    }
}

/// A triangle with concrete vertex positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub vertices: [Point3<f64>; 3],
}

impl Triangle {
    /// Create a new triangle from three points.
    #[inline]
    pub fn new(v0: Point3<f64>, v1: Point3<f64>, v2: Point3<f64>) -> Self {
        Self {
            vertices: [v0, v1, v2],
        }
    }

    /// Compute the (unnormalized) face normal via cross product.
    #[inline]
    pub fn normal_unnormalized(&self) -> Vector3<f64> {
        let [v0, v1, v2] = self.vertices;
        (v1 - v0).cross(&(v2 - v0))
    }

    /// Compute the area of the triangle.
    #[inline]
    pub fn area(&self) -> f64 {
        self.normal_unnormalized().norm() * 0.5
    }

    /// Compute the centroid.
    #[inline]
    pub fn centroid(&self) -> Point3<f64> {
        let [v0, v1, v2] = self.vertices;
        Point3::from((v0.coords + v1.coords + v2.coords) / 3.0)
    }

    /// Compute the lengths of the three edges: [len01, len12, len20].
    #[inline]
    pub fn edge_lengths(&self) -> [f64; 3] {
        let [v0, v1, v2] = self.vertices;
        [(v1 - v0).norm(), (v2 - v1).norm(), (v0 - v2).norm()]
    }

    /// Radius of the inscribed circle (area / semi-perimeter).
    pub fn inradius(&self) -> f64 {
        let [a, b, c] = self.edge_lengths();
        let s = 0.5 * (a + b + c);
        if s > 0.0 { self.area() / s } else { 0.0 }
    }

    /// Interior angles in degrees, at v0, v1 and v2.
    ///
    /// Angles at a vertex with a zero-length adjacent edge are reported as 0.
    pub fn interior_angles(&self) -> [f64; 3] {
        let [v0, v1, v2] = self.vertices;
        [
            angle_between(&(v1 - v0), &(v2 - v0)),
            angle_between(&(v2 - v1), &(v0 - v1)),
            angle_between(&(v0 - v2), &(v1 - v2)),
        ]
    }
}

/// Node pairs forming the six edges of a tetrahedron.
pub const TET_EDGES: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// A tetrahedron with concrete vertex positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tetrahedron {
    pub vertices: [Point3<f64>; 4],
}

impl Tetrahedron {
    /// Create a new tetrahedron from four points.
    #[inline]
    pub fn new(v0: Point3<f64>, v1: Point3<f64>, v2: Point3<f64>, v3: Point3<f64>) -> Self {
        Self {
            vertices: [v0, v1, v2, v3],
        }
    }

    /// Determinant of the edge matrix `[v1 - v0, v2 - v0, v3 - v0]`.
    ///
    /// Positive for a right-handed node ordering; six times the signed volume.
    #[inline]
    pub fn jacobian(&self) -> f64 {
        let [v0, v1, v2, v3] = self.vertices;
        (v1 - v0).dot(&(v2 - v0).cross(&(v3 - v0)))
    }

    /// Signed volume.
    #[inline]
    pub fn signed_volume(&self) -> f64 {
        self.jacobian() / 6.0
    }

    /// Absolute volume.
    #[inline]
    pub fn volume(&self) -> f64 {
        self.signed_volume().abs()
    }

    /// Compute the centroid.
    #[inline]
    pub fn centroid(&self) -> Point3<f64> {
        let [v0, v1, v2, v3] = self.vertices;
        Point3::from((v0.coords + v1.coords + v2.coords + v3.coords) / 4.0)
    }

    /// Lengths of the six edges in [`TET_EDGES`] order.
    pub fn edge_lengths(&self) -> [f64; 6] {
        TET_EDGES.map(|(a, b)| (self.vertices[b] - self.vertices[a]).norm())
    }

    /// The four faces; face `i` is opposite vertex `i`.
    pub fn faces(&self) -> [Triangle; 4] {
        let [v0, v1, v2, v3] = self.vertices;
        [
            Triangle::new(v1, v2, v3),
            Triangle::new(v0, v3, v2),
            Triangle::new(v0, v1, v3),
            Triangle::new(v0, v2, v1),
        ]
    }

    /// Total surface area of the four faces.
    pub fn surface_area(&self) -> f64 {
        self.faces().iter().map(Triangle::area).sum()
    }

    /// Radius of the inscribed sphere (3V / surface area).
    pub fn inradius(&self) -> f64 {
        let area = self.surface_area();
        if area > 0.0 {
            3.0 * self.volume() / area
        } else {
            0.0
        }
    }

    /// Dihedral angles in degrees, one per edge in [`TET_EDGES`] order.
    ///
    /// The angle at edge (a, b) is measured between the two faces sharing the
    /// edge, by projecting the two opposite vertices onto the plane
    /// perpendicular to the edge.
    pub fn dihedral_angles(&self) -> [f64; 6] {
        TET_EDGES.map(|(a, b)| {
            let (c, d) = opposite_pair(a, b);
            let p = self.vertices;
            let axis = p[b] - p[a];
            let len_sq = axis.norm_squared();
            if len_sq == 0.0 {
                return 0.0;
            }
            let project = |v: Vector3<f64>| v - axis * (v.dot(&axis) / len_sq);
            angle_between(&project(p[c] - p[a]), &project(p[d] - p[a]))
        })
    }
}

fn opposite_pair(a: usize, b: usize) -> (usize, usize) {
    let mut rest = (0..4).filter(|&i| i != a && i != b);
    match (rest.next(), rest.next()) {
        (Some(c), Some(d)) => (c, d),
        _ => unreachable!("tetrahedron edges always leave two opposite vertices"),
    }
}

/// Angle between two vectors in degrees; 0 when either has zero length.
fn angle_between(u: &Vector3<f64>, v: &Vector3<f64>) -> f64 {
    let denom = u.norm() * v.norm();
    if denom == 0.0 {
        return 0.0;
    }
    (u.dot(v) / denom).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Concrete geometry of one element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElementGeometry {
    Triangle(Triangle),
    Tetrahedron(Tetrahedron),
}

impl ElementGeometry {
    /// Kind of the element.
    #[inline]
    pub fn kind(&self) -> ElementKind {
        match self {
            ElementGeometry::Triangle(_) => ElementKind::Triangle,
            ElementGeometry::Tetrahedron(_) => ElementKind::Tetrahedron,
        }
    }

    /// Node coordinates.
    #[inline]
    pub fn vertices(&self) -> &[Point3<f64>] {
        match self {
            ElementGeometry::Triangle(t) => &t.vertices,
            ElementGeometry::Tetrahedron(t) => &t.vertices,
        }
    }

    /// Arithmetic mean of the node coordinates.
    #[inline]
    pub fn centroid(&self) -> Point3<f64> {
        match self {
            ElementGeometry::Triangle(t) => t.centroid(),
            ElementGeometry::Tetrahedron(t) => t.centroid(),
        }
    }

    /// Volume for tetrahedra, area for triangles.
    #[inline]
    pub fn measure(&self) -> f64 {
        match self {
            ElementGeometry::Triangle(t) => t.area(),
            ElementGeometry::Tetrahedron(t) => t.volume(),
        }
    }

    /// Edge length summary.
    pub fn edge_stats(&self) -> EdgeStats {
        match self {
            ElementGeometry::Triangle(t) => EdgeStats::from_lengths(&t.edge_lengths()),
            ElementGeometry::Tetrahedron(t) => EdgeStats::from_lengths(&t.edge_lengths()),
        }
    }
}
