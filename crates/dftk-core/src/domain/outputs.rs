use super::{KpointsData, Structure};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Dense row-major array with its shape and physical unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayData {
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
    pub unit: String,
}

impl ArrayData {
    pub fn new(shape: Vec<usize>, values: Vec<f64>, unit: impl Into<String>) -> Option<Self> {
        let expected = shape
            .iter()
            .try_fold(1usize, |count, extent| count.checked_mul(*extent))?;
        (expected == values.len()).then(|| Self {
            shape,
            values,
            unit: unit.into(),
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0;
        for (position, extent) in index.iter().zip(&self.shape) {
            if position >= extent {
                return None;
            }
            offset = offset * extent + position;
        }
        self.values.get(offset).copied()
    }
}

/// Eigenvalues along a k-path, indexed `(spin, k-point, band)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandStructure {
    pub kpoints: Vec<[f64; 3]>,
    pub eigenvalues: ArrayData,
    pub converged: bool,
}

impl BandStructure {
    pub fn n_spin_components(&self) -> usize {
        self.eigenvalues.shape[0]
    }
}

/// Named output channels of one calculation; a channel is present only when produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculationOutputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_parameters: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_structure: Option<Structure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_kpoints: Option<KpointsData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_forces: Option<ArrayData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_stresses: Option<ArrayData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_bands: Option<BandStructure>,
}

impl CalculationOutputs {
    pub fn converged(&self) -> Option<bool> {
        self.output_parameters
            .as_ref()
            .and_then(|parameters| parameters.get("converged"))
            .and_then(Value::as_bool)
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.output_parameters.is_some() {
            names.push("output_parameters");
        }
        if self.output_structure.is_some() {
            names.push("output_structure");
        }
        if self.output_kpoints.is_some() {
            names.push("output_kpoints");
        }
        if self.output_forces.is_some() {
            names.push("output_forces");
        }
        if self.output_stresses.is_some() {
            names.push("output_stresses");
        }
        if self.output_bands.is_some() {
            names.push("output_bands");
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::ArrayData;

    #[test]
    fn array_rejects_shape_value_mismatch() {
        assert!(ArrayData::new(vec![2, 3], vec![0.0; 5], "hartree/bohr").is_none());
    }

    #[test]
    fn array_indexing_is_row_major() {
        let array = ArrayData::new(vec![2, 3], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0], "hartree/bohr")
            .expect("shape should match");
        assert_eq!(array.get(&[1, 0]), Some(3.0));
        assert_eq!(array.get(&[0, 2]), Some(2.0));
        assert_eq!(array.get(&[2, 0]), None);
    }

    #[test]
    fn overflowing_shape_is_rejected() {
        assert!(ArrayData::new(vec![usize::MAX, 2], vec![0.0; 4], "hartree").is_none());
    }
}
