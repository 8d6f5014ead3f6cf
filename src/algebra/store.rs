//! Arena-backed equation store with dense LU solving.

use std::collections::HashMap;

use super::{Element, PIVOT_THRESHOLD};
use crate::error::{NodalError, Result};

/// Handle to a matrix accumulator reserved in an [`EquationStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MatrixSlot(usize);

impl MatrixSlot {
    /// The slot every ground coordinate resolves to.
    pub const DISCARD: MatrixSlot = MatrixSlot(0);

    /// Check if writes to this slot are thrown away.
    pub fn is_discard(&self) -> bool {
        self.0 == 0
    }
}

/// Handle to a right-hand side accumulator reserved in an [`EquationStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RhsSlot(usize);

impl RhsSlot {
    /// The slot the ground row resolves to.
    pub const DISCARD: RhsSlot = RhsSlot(0);

    /// Check if writes to this slot are thrown away.
    pub fn is_discard(&self) -> bool {
        self.0 == 0
    }
}

/// MNA system `A x = b` addressed through reserved slots.
///
/// Coordinates are variable indices (0 = ground). Reserving the same
/// coordinate twice yields the same handle, so devices sharing a node
/// accumulate into one element.
#[derive(Debug, Clone)]
pub struct EquationStore<T: Element> {
    /// Number of variables, ground included
    size: usize,
    /// Coordinate of every matrix slot (slot 0 is the discard slot)
    coordinates: Vec<(usize, usize)>,
    /// Reverse lookup from coordinate to slot
    elements: HashMap<(usize, usize), MatrixSlot>,
    /// Accumulated matrix values, one per slot
    values: Vec<T>,
    /// Row of every RHS slot (slot 0 is the discard slot)
    rows: Vec<usize>,
    /// Reverse lookup from row to RHS slot
    rhs_slots: HashMap<usize, RhsSlot>,
    /// Accumulated RHS values, one per slot
    rhs: Vec<T>,
    /// LU decomposition of A without the ground row/column (row-major)
    lu: Vec<T>,
    /// Pivot permutation of the LU decomposition
    pivots: Vec<usize>,
}

impl<T: Element> EquationStore<T> {
    /// Create a store for `size` variables (ground included).
    pub fn new(size: usize) -> Self {
        let n = size.saturating_sub(1);
        Self {
            size,
            coordinates: vec![(0, 0)],
            elements: HashMap::new(),
            values: vec![T::zero()],
            rows: vec![0],
            rhs_slots: HashMap::new(),
            rhs: vec![T::zero()],
            lu: vec![T::zero(); n * n],
            pivots: vec![0; n],
        }
    }

    /// Number of variables, ground included.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of reserved matrix slots, excluding the discard slot.
    pub fn element_count(&self) -> usize {
        self.coordinates.len() - 1
    }

    /// Reserve the matrix accumulator at (row, col).
    pub fn reserve_matrix(&mut self, row: usize, col: usize) -> Result<MatrixSlot> {
        if row >= self.size || col >= self.size {
            return Err(NodalError::SlotOutOfRange {
                row,
                col,
                size: self.size,
            });
        }
        if row == 0 || col == 0 {
            return Ok(MatrixSlot::DISCARD);
        }
        if let Some(&slot) = self.elements.get(&(row, col)) {
            return Ok(slot);
        }
        let slot = MatrixSlot(self.coordinates.len());
        self.coordinates.push((row, col));
        self.values.push(T::zero());
        self.elements.insert((row, col), slot);
        Ok(slot)
    }

    /// Reserve the right-hand side accumulator of a row.
    pub fn reserve_rhs(&mut self, row: usize) -> Result<RhsSlot> {
        if row >= self.size {
            return Err(NodalError::SlotOutOfRange {
                row,
                col: 0,
                size: self.size,
            });
        }
        if row == 0 {
            return Ok(RhsSlot::DISCARD);
        }
        if let Some(&slot) = self.rhs_slots.get(&row) {
            return Ok(slot);
        }
        let slot = RhsSlot(self.rows.len());
        self.rows.push(row);
        self.rhs.push(T::zero());
        self.rhs_slots.insert(row, slot);
        Ok(slot)
    }

    /// Clear every accumulator to zero.
    pub fn clear(&mut self) {
        self.values.fill(T::zero());
        self.rhs.fill(T::zero());
    }

    /// Accumulate into a matrix slot.
    pub fn add(&mut self, slot: MatrixSlot, value: T) {
        self.values[slot.0] += value;
    }

    /// Accumulate into a right-hand side slot.
    pub fn add_rhs(&mut self, slot: RhsSlot, value: T) {
        self.rhs[slot.0] += value;
    }

    /// Assembled value at (row, col), zero if never reserved.
    pub fn matrix_value(&self, row: usize, col: usize) -> T {
        self.elements
            .get(&(row, col))
            .map(|slot| self.values[slot.0])
            .unwrap_or_default()
    }

    /// Assembled right-hand side of a row, zero if never reserved.
    pub fn rhs_value(&self, row: usize) -> T {
        self.rhs_slots
            .get(&row)
            .map(|slot| self.rhs[slot.0])
            .unwrap_or_default()
    }

    /// Perform LU decomposition with partial pivoting.
    ///
    /// `diagonal_gmin` is added to every diagonal element first.
    pub fn factor(&mut self, diagonal_gmin: f64) -> Result<()> {
        let n = self.size.saturating_sub(1);
        self.lu.fill(T::zero());
        for (slot, &(row, col)) in self.coordinates.iter().enumerate().skip(1) {
            self.lu[(row - 1) * n + (col - 1)] += self.values[slot];
        }
        if diagonal_gmin > 0.0 {
            let g = T::from_real(diagonal_gmin);
            for i in 0..n {
                self.lu[i * n + i] += g;
            }
        }

        for (i, pivot) in self.pivots.iter_mut().enumerate() {
            *pivot = i;
        }

        for k in 0..n {
            // Find pivot
            let mut max_val = self.lu[k * n + k].magnitude();
            let mut max_row = k;
            for i in (k + 1)..n {
                let val = self.lu[i * n + k].magnitude();
                if val > max_val {
                    max_val = val;
                    max_row = i;
                }
            }

            if max_val.is_nan() || max_val < PIVOT_THRESHOLD {
                return Err(NodalError::SingularMatrix { row: k + 1 });
            }

            if max_row != k {
                self.pivots.swap(k, max_row);
                for j in 0..n {
                    self.lu.swap(k * n + j, max_row * n + j);
                }
            }

            // Eliminate
            let pivot = self.lu[k * n + k];
            for i in (k + 1)..n {
                let factor = self.lu[i * n + k] / pivot;
                self.lu[i * n + k] = factor;
                for j in (k + 1)..n {
                    let upper = self.lu[k * n + j];
                    self.lu[i * n + j] -= factor * upper;
                }
            }
        }

        Ok(())
    }

    /// Solve with the last factorization, writing into `solution`.
    ///
    /// `solution` is indexed by variable; index 0 (ground) is set to zero.
    pub fn solve(&self, solution: &mut [T]) -> Result<()> {
        let n = self.size.saturating_sub(1);
        if solution.len() != self.size {
            return Err(NodalError::invalid_simulation(format!(
                "solution vector has {} entries, system has {}",
                solution.len(),
                self.size
            )));
        }

        let mut b = vec![T::zero(); n];
        for (slot, &row) in self.rows.iter().enumerate().skip(1) {
            b[row - 1] += self.rhs[slot];
        }

        // Apply pivot permutation
        let mut x: Vec<T> = self.pivots.iter().map(|&p| b[p]).collect();

        // Forward substitution (L * y = Pb)
        for i in 0..n {
            for j in 0..i {
                let l = self.lu[i * n + j];
                let y = x[j];
                x[i] -= l * y;
            }
        }

        // Back substitution (U * x = y)
        for i in (0..n).rev() {
            for j in (i + 1)..n {
                let u = self.lu[i * n + j];
                let xj = x[j];
                x[i] -= u * xj;
            }
            let diag = self.lu[i * n + i];
            let magnitude = diag.magnitude();
            if magnitude.is_nan() || magnitude < PIVOT_THRESHOLD {
                return Err(NodalError::SingularMatrix { row: i + 1 });
            }
            x[i] = x[i] / diag;
        }

        solution[0] = T::zero();
        solution[1..].copy_from_slice(&x);
        Ok(())
    }
}

/// The four slots of a conductance between two nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConductanceSlots {
    pos_pos: MatrixSlot,
    neg_neg: MatrixSlot,
    pos_neg: MatrixSlot,
    neg_pos: MatrixSlot,
}

impl ConductanceSlots {
    /// Reserve the slots for a conductance between `pos` and `neg`.
    pub fn reserve<T: Element>(
        store: &mut EquationStore<T>,
        pos: usize,
        neg: usize,
    ) -> Result<Self> {
        Ok(Self {
            pos_pos: store.reserve_matrix(pos, pos)?,
            neg_neg: store.reserve_matrix(neg, neg)?,
            pos_neg: store.reserve_matrix(pos, neg)?,
            neg_pos: store.reserve_matrix(neg, pos)?,
        })
    }

    /// Stamp a conductance G between the two nodes.
    ///   A[p,p] += G, A[n,n] += G, A[p,n] -= G, A[n,p] -= G
    pub fn stamp<T: Element>(&self, store: &mut EquationStore<T>, g: T) {
        store.add(self.pos_pos, g);
        store.add(self.neg_neg, g);
        store.add(self.pos_neg, -g);
        store.add(self.neg_pos, -g);
    }
}

/// The incidence slots tying a branch current to its two nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchSlots {
    pos_branch: MatrixSlot,
    neg_branch: MatrixSlot,
    branch_pos: MatrixSlot,
    branch_neg: MatrixSlot,
}

impl BranchSlots {
    /// Reserve the incidence slots of `branch` between `pos` and `neg`.
    pub fn reserve<T: Element>(
        store: &mut EquationStore<T>,
        pos: usize,
        neg: usize,
        branch: usize,
    ) -> Result<Self> {
        Ok(Self {
            pos_branch: store.reserve_matrix(pos, branch)?,
            neg_branch: store.reserve_matrix(neg, branch)?,
            branch_pos: store.reserve_matrix(branch, pos)?,
            branch_neg: store.reserve_matrix(branch, neg)?,
        })
    }

    /// Stamp the KCL incidence and the KVL row `V[p] - V[n]`.
    pub fn stamp<T: Element>(&self, store: &mut EquationStore<T>) {
        let one = T::from_real(1.0);
        store.add(self.pos_branch, one);
        store.add(self.branch_pos, one);
        store.add(self.neg_branch, -one);
        store.add(self.branch_neg, -one);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use num_complex::Complex64;

    #[test]
    fn test_ground_coordinates_are_discarded() {
        let mut store = EquationStore::<f64>::new(3);
        assert!(store.reserve_matrix(0, 1).unwrap().is_discard());
        assert!(store.reserve_matrix(2, 0).unwrap().is_discard());
        assert!(store.reserve_rhs(0).unwrap().is_discard());
        assert_eq!(store.element_count(), 0);
    }

    #[test]
    fn test_reservation_is_idempotent() {
        let mut store = EquationStore::<f64>::new(3);
        let a = store.reserve_matrix(1, 2).unwrap();
        let b = store.reserve_matrix(1, 2).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.reserve_rhs(2).unwrap(), store.reserve_rhs(2).unwrap());
        assert_eq!(store.element_count(), 1);
    }

    #[test]
    fn test_out_of_range_reservation_fails() {
        let mut store = EquationStore::<f64>::new(2);
        assert!(matches!(
            store.reserve_matrix(1, 2),
            Err(NodalError::SlotOutOfRange { .. })
        ));
    }

    #[test]
    fn test_voltage_divider() {
        // V1 = 10V on node 1 (branch 3), R 1k from 1 to 2, R 1k from 2 to ground
        let mut store = EquationStore::<f64>::new(4);
        let r1 = ConductanceSlots::reserve(&mut store, 1, 2).unwrap();
        let r2 = ConductanceSlots::reserve(&mut store, 2, 0).unwrap();
        let v1 = BranchSlots::reserve(&mut store, 1, 0, 3).unwrap();
        let rhs = store.reserve_rhs(3).unwrap();

        r1.stamp(&mut store, 1e-3);
        r2.stamp(&mut store, 1e-3);
        v1.stamp(&mut store);
        store.add_rhs(rhs, 10.0);

        let mut x = vec![0.0; 4];
        store.factor(0.0).unwrap();
        store.solve(&mut x).unwrap();

        assert_eq!(x[0], 0.0);
        assert_relative_eq!(x[1], 10.0, epsilon = 1e-12);
        assert_relative_eq!(x[2], 5.0, epsilon = 1e-12);
        assert_relative_eq!(x[3], -5e-3, epsilon = 1e-15);
    }

    #[test]
    fn test_clear_resets_accumulators() {
        let mut store = EquationStore::<f64>::new(2);
        let slot = store.reserve_matrix(1, 1).unwrap();
        store.add(slot, 2.0);
        store.add(slot, 3.0);
        assert_eq!(store.matrix_value(1, 1), 5.0);
        store.clear();
        assert_eq!(store.matrix_value(1, 1), 0.0);
    }

    #[test]
    fn test_singular_matrix() {
        // Floating node 2
        let mut store = EquationStore::<f64>::new(3);
        let r = ConductanceSlots::reserve(&mut store, 1, 0).unwrap();
        r.stamp(&mut store, 1.0);
        assert!(matches!(
            store.factor(0.0),
            Err(NodalError::SingularMatrix { row: 2 })
        ));

        // Diagonal gmin makes the same system solvable
        store.factor(1e-12).unwrap();
    }

    #[test]
    fn test_complex_solve() {
        // Admittance j on node 1 driven by 1A
        let mut store = EquationStore::<Complex64>::new(2);
        let slot = store.reserve_matrix(1, 1).unwrap();
        let rhs = store.reserve_rhs(1).unwrap();
        store.add(slot, Complex64::new(0.0, 1.0));
        store.add_rhs(rhs, Complex64::new(1.0, 0.0));

        let mut x = vec![Complex64::default(); 2];
        store.factor(0.0).unwrap();
        store.solve(&mut x).unwrap();
        assert_relative_eq!(x[1].re, 0.0, epsilon = 1e-15);
        assert_relative_eq!(x[1].im, -1.0, epsilon = 1e-15);
    }
}
