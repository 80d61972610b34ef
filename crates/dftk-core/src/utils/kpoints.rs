use crate::domain::{DftkError, DftkResult, KpointsData, Structure};
use faer::Mat;
use std::f64::consts::PI;

const SYMMETRIC_CELL_EPSILON: f64 = 1.0e-5;

/// Reciprocal lattice `2π (A⁻¹)ᵀ` with the reciprocal vectors stored as rows.
pub fn reciprocal_cell(cell: &[[f64; 3]; 3]) -> Option<Mat<f64>> {
    let mut direct = Mat::<f64>::zeros(3, 3);
    for (row, vector) in cell.iter().enumerate() {
        for (col, value) in vector.iter().enumerate() {
            direct[(row, col)] = *value;
        }
    }

    let volume = direct[(0, 0)] * cofactor(&direct, 0, 0)
        + direct[(0, 1)] * cofactor(&direct, 0, 1)
        + direct[(0, 2)] * cofactor(&direct, 0, 2);
    if !volume.is_finite() || volume.abs() < f64::EPSILON {
        return None;
    }

    // (A⁻¹)ᵀ is the cofactor matrix divided by the determinant.
    let mut reciprocal = Mat::<f64>::zeros(3, 3);
    for row in 0..3 {
        for col in 0..3 {
            reciprocal[(row, col)] = 2.0 * PI * cofactor(&direct, row, col) / volume;
        }
    }
    Some(reciprocal)
}

/// Uniform mesh whose spacing in reciprocal space is at most `distance` (1/Å).
///
/// Cells whose three vectors share one length always get an isotropic mesh.
pub fn create_kpoints_from_distance(
    structure: &Structure,
    distance: f64,
) -> DftkResult<KpointsData> {
    if !distance.is_finite() || distance <= 0.0 {
        return Err(DftkError::input_validation(
            "INPUT.KPOINTS_DISTANCE",
            format!("k-points distance must be positive, got {distance}"),
        ));
    }

    let reciprocal = reciprocal_cell(&structure.cell).ok_or_else(|| {
        DftkError::input_validation(
            "INPUT.KPOINTS_CELL",
            "cannot build a k-point mesh for a singular cell",
        )
    })?;

    let mut mesh = [1_u32; 3];
    for (axis, divisions) in mesh.iter_mut().enumerate() {
        let norm = (0..3)
            .map(|col| reciprocal[(axis, col)].powi(2))
            .sum::<f64>()
            .sqrt();
        let ratio = ((norm / distance * 1.0e5).round() / 1.0e5).ceil();
        if ratio > f64::from(u32::MAX) {
            return Err(DftkError::computation(
                "RUN.KPOINTS_MESH_SIZE",
                format!("k-points distance {distance} gives too many divisions along axis {axis}"),
            ));
        }
        *divisions = (ratio as u32).max(1);
    }

    let lengths = structure.cell_lengths();
    let is_symmetric_cell = lengths
        .iter()
        .all(|length| (length - lengths[0]).abs() < SYMMETRIC_CELL_EPSILON);
    let is_symmetric_mesh = mesh.iter().all(|divisions| *divisions == mesh[0]);
    if is_symmetric_cell && !is_symmetric_mesh {
        let largest = mesh.iter().copied().max().unwrap_or(1);
        mesh = [largest; 3];
    }

    Ok(KpointsData::mesh(mesh))
}

fn cofactor(matrix: &Mat<f64>, row: usize, col: usize) -> f64 {
    let (r1, r2) = ((row + 1) % 3, (row + 2) % 3);
    let (c1, c2) = ((col + 1) % 3, (col + 2) % 3);
    matrix[(r1, c1)] * matrix[(r2, c2)] - matrix[(r1, c2)] * matrix[(r2, c1)]
}
