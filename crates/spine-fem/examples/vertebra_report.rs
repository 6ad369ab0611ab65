//! Example: material and quality report for a synthetic vertebral body.
//!
//! Builds a CT-like phantom (a cylinder of trabecular bone with a cortical
//! shell, surrounded by soft tissue), meshes a box around it with
//! tetrahedra, maps bone density onto the mesh and prints per-field
//! summaries followed by the first few elements as CSV.
//!
//! Run with: `cargo run --example vertebra_report`
//! Verbose logging: `RUST_LOG=spine_fem=debug cargo run --example vertebra_report`

use anyhow::{Context, Result};
use nalgebra::{Affine3, Point3, Translation3, Vector3};
use spine_fem::progress::Progress;
use spine_fem::{
    Calibration, Interpolation, MaterialParams, Mesh, MeshFields, ProgressCallback,
    QualityMetric, QualityParams, StatisticsParams, VoxelVolume,
    compute_material_fields_with_progress, compute_quality_fields,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Phantom dimensions in mm.
const BODY_RADIUS: f64 = 18.0;
const CORTEX_THICKNESS: f64 = 1.5;
const BODY_HEIGHT: f64 = 25.0;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

/// HU phantom centered on the z axis, voxel origin at the image corner.
fn create_phantom() -> Result<VoxelVolume> {
    let spacing = Vector3::new(0.6, 0.6, 1.0);
    let dims = [80, 80, 40];
    let center = Point3::new(24.0, 24.0, 20.0);

    let volume = VoxelVolume::from_fn(dims, Point3::origin(), spacing, |p| {
        let r = ((p.x - center.x).powi(2) + (p.y - center.y).powi(2)).sqrt();
        let dz = (p.z - center.z).abs();
        if r > BODY_RADIUS || dz > BODY_HEIGHT / 2.0 {
            40.0 // soft tissue
        } else if r > BODY_RADIUS - CORTEX_THICKNESS {
            1100.0 // cortical shell
        } else {
            (180.0 + 60.0 * (p.z - center.z) / BODY_HEIGHT) as f32 // trabecular gradient
        }
    })
    .context("building phantom volume")?;

    Ok(volume.with_interpolation(Interpolation::Trilinear))
}

/// Tetrahedral mesh of the box `[-half, half]^2 x [-h/2, h/2]`, in a frame
/// centered on the vertebral body.
fn create_mesh(cells_per_side: usize, half: f64, height: f64) -> Result<Mesh> {
    let n = cells_per_side;
    let stride = n + 1;
    let step = Vector3::new(2.0 * half / n as f64, 2.0 * half / n as f64, height / n as f64);
    let node = |x: usize, y: usize, z: usize| (x + y * stride + z * stride * stride) as u32;

    let mut nodes = Vec::with_capacity(stride.pow(3));
    for z in 0..stride {
        for y in 0..stride {
            for x in 0..stride {
                nodes.push(Point3::new(
                    -half + x as f64 * step.x,
                    -half + y as f64 * step.y,
                    -height / 2.0 + z as f64 * step.z,
                ));
            }
        }
    }

    let mut cells = Vec::with_capacity(n.pow(3) * 6);
    for z in 0..n {
        for y in 0..n {
            for x in 0..n {
                let c = [
                    node(x, y, z),
                    node(x + 1, y, z),
                    node(x + 1, y + 1, z),
                    node(x, y + 1, z),
                    node(x, y, z + 1),
                    node(x + 1, y, z + 1),
                    node(x + 1, y + 1, z + 1),
                    node(x, y + 1, z + 1),
                ];
                for [a, b] in [[1, 2], [2, 3], [3, 7], [7, 4], [4, 5], [5, 1]] {
                    cells.push(vec![c[0], c[a], c[b], c[6]]);
                }
            }
        }
    }

    Mesh::from_connectivity(nodes, &cells).context("building tetrahedral mesh")
}

fn main() -> Result<()> {
    init_tracing();

    let image = create_phantom()?;
    // The mesh extends past the image in x and y so some elements get no data.
    let mesh = create_mesh(12, 28.0, BODY_HEIGHT)?;
    let mesh_to_image =
        Affine3::from_matrix_unchecked(Translation3::new(24.0, 24.0, 20.0).to_homogeneous());

    // Phantom-derived calibration for a 120 kVp scan.
    let calibration = Calibration::new(0.81, -1.6)?;

    let callback: ProgressCallback = Box::new(|p: &Progress| {
        eprintln!("  material mapping: {:>3}%", p.percent());
        true
    });
    let params = MaterialParams {
        batch_size: 2048,
        ..MaterialParams::default()
    };
    let material = compute_material_fields_with_progress(
        &mesh,
        &image,
        &mesh_to_image,
        &calibration,
        &params,
        Some(&callback),
    )?;
    println!("{}", material);

    let quality = compute_quality_fields(
        &mesh,
        &[
            QualityMetric::AspectRatio,
            QualityMetric::ScaledJacobian,
            QualityMetric::MinAngle,
            QualityMetric::Volume,
        ],
        &QualityParams::default(),
    )?;
    println!("{}", quality);

    let mut fields = MeshFields::new(&mesh);
    fields.attach_material(material)?;
    fields.attach_quality(quality)?;

    println!();
    for report in fields.report(&StatisticsParams::with_bins(10)) {
        println!("{}", report);
    }

    let columns = ["HU", "BMD", "BV/TV", "Aspect Ratio"];
    println!();
    println!("element,{}", columns.join(","));
    for row in fields.element_rows(&columns, 0..10.min(mesh.element_count()))? {
        println!("{}", row.to_delimited(","));
    }

    Ok(())
}
