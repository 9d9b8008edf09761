use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::prelude::*;

/// Ends of one pin: `(branch, polarity)` pairs in element-local branch
/// numbering, polarity +1 at the positive end and -1 at the negative.
pub type PinEnds = Vec<(usize, i32)>;

#[derive(Debug)]
struct ElementInner {
    mv: SparseMat<f64>,
    mi: SparseMat<f64>,
    mx: SparseMat<f64>,
    mxd: SparseMat<f64>,
    mq: SparseMat<f64>,
    mu: SparseMat<f64>,
    u0: SparseMat<f64>,
    pv: SparseMat<f64>,
    pi: SparseMat<f64>,
    px: SparseMat<f64>,
    pxd: SparseMat<f64>,
    pq: SparseMat<f64>,
    nonlinear_eq: Expr,
    pins: IndexMap<String, PinEnds>,
}

/// One circuit element: an immutable bundle of coefficient matrices, an
/// optional nonlinear equation block and a pin table.
///
/// Cloning is cheap and preserves identity: a circuit recognizes a
/// clone as the same element, and one element can sit in several
/// circuits at once.
#[derive(Debug, Clone)]
pub struct Element {
    inner: Rc<ElementInner>,
}

/// A macro to generate the optional matrix setters on the builder.
macro_rules! matrix_setters {
    ($($field:ident),* $(,)?) => {
        $(
            pub fn $field(mut self, matrix: SparseMat<f64>) -> Self {
                self.$field = Some(matrix);
                self
            }
        )*
    };
}

/// Builds an [`Element`] from any subset of its coefficient matrices.
///
/// Matrix shapes share dimension symbols (`mv` is `nl x nb`, `mx` is
/// `nl x nx`, ...); `build` unifies the symbols across everything
/// supplied and zero-fills the rest. Unbound symbols default to 0.
#[derive(Debug, Default)]
pub struct ElementBuilder {
    mv: Option<SparseMat<f64>>,
    mi: Option<SparseMat<f64>>,
    mx: Option<SparseMat<f64>>,
    mxd: Option<SparseMat<f64>>,
    mq: Option<SparseMat<f64>>,
    mu: Option<SparseMat<f64>>,
    u0: Option<SparseMat<f64>>,
    pv: Option<SparseMat<f64>>,
    pi: Option<SparseMat<f64>>,
    px: Option<SparseMat<f64>>,
    pxd: Option<SparseMat<f64>>,
    pq: Option<SparseMat<f64>>,
    pins: Option<IndexMap<String, PinEnds>>,
    nonlinear_eq: Option<Expr>,
}

fn bind_size(sizes: &mut HashMap<&'static str, usize>, symbol: &'static str, size: usize) -> Result<()> {
    if let Some(&existing) = sizes.get(symbol) {
        if existing != size {
            return Err(Error::DimensionConflict {
                symbol,
                existing,
                conflicting: size,
            });
        }
    } else {
        sizes.insert(symbol, size);
    }
    Ok(())
}

/// Default pin table for `nb` branches: pin `2k-1` is the positive end
/// of branch `k`, pin `2k` the negative end.
fn default_pins(nb: usize) -> IndexMap<String, PinEnds> {
    let mut pins = IndexMap::new();
    for branch in 0..nb {
        pins.insert((2 * branch + 1).to_string(), vec![(branch, 1)]);
        pins.insert((2 * branch + 2).to_string(), vec![(branch, -1)]);
    }
    pins
}

impl ElementBuilder {
    matrix_setters!(mv, mi, mx, mxd, mq, mu, u0, pv, pi, px, pxd, pq);

    pub fn pins<I, S>(mut self, pins: I) -> Self
    where
        I: IntoIterator<Item = (S, PinEnds)>,
        S: Into<String>,
    {
        self.pins = Some(pins.into_iter().map(|(name, ends)| (name.into(), ends)).collect());
        self
    }

    pub fn nonlinear_eq(mut self, eq: Expr) -> Self {
        self.nonlinear_eq = Some(eq);
        self
    }

    pub fn build(self) -> Result<Element> {
        let mut sizes: HashMap<&'static str, usize> = HashMap::new();
        sizes.insert("n0", 1);

        let supplied: [(&Option<SparseMat<f64>>, &'static str, &'static str); 12] = [
            (&self.mv, "nl", "nb"),
            (&self.mi, "nl", "nb"),
            (&self.mx, "nl", "nx"),
            (&self.mxd, "nl", "nx"),
            (&self.mq, "nl", "nq"),
            (&self.mu, "nl", "nu"),
            (&self.u0, "nl", "n0"),
            (&self.pv, "ny", "nb"),
            (&self.pi, "ny", "nb"),
            (&self.px, "ny", "nx"),
            (&self.pxd, "ny", "nx"),
            (&self.pq, "ny", "nq"),
        ];
        for (matrix, row_symbol, col_symbol) in supplied {
            if let Some(matrix) = matrix {
                bind_size(&mut sizes, row_symbol, matrix.nrows())?;
                bind_size(&mut sizes, col_symbol, matrix.ncols())?;
            }
        }

        let dim = |symbol: &str| sizes.get(symbol).copied().unwrap_or(0);
        let nb = dim("nb");
        let nx = dim("nx");
        let nq = dim("nq");
        let nu = dim("nu");
        let nl = dim("nl");
        let ny = dim("ny");
        if nl > nb + nx + nq {
            return Err(Error::ExtraLinearEquations {
                nl,
                variables: nb + nx + nq,
            });
        }

        let pins = match self.pins {
            Some(pins) => {
                for (name, ends) in &pins {
                    for &(branch, _) in ends {
                        if branch >= nb {
                            return Err(Error::PinOutOfRange {
                                pin: name.clone(),
                                branch,
                                nb,
                            });
                        }
                    }
                }
                pins
            }
            None => default_pins(nb),
        };

        let fill = |matrix: Option<SparseMat<f64>>, rows: usize, cols: usize| {
            matrix.unwrap_or_else(|| SparseMat::zeros(rows, cols))
        };

        Ok(Element {
            inner: Rc::new(ElementInner {
                mv: fill(self.mv, nl, nb),
                mi: fill(self.mi, nl, nb),
                mx: fill(self.mx, nl, nx),
                mxd: fill(self.mxd, nl, nx),
                mq: fill(self.mq, nl, nq),
                mu: fill(self.mu, nl, nu),
                u0: fill(self.u0, nl, 1),
                pv: fill(self.pv, ny, nb),
                pi: fill(self.pi, ny, nb),
                px: fill(self.px, ny, nx),
                pxd: fill(self.pxd, ny, nx),
                pq: fill(self.pq, ny, nq),
                nonlinear_eq: self.nonlinear_eq.unwrap_or_else(Expr::empty),
                pins,
            }),
        })
    }
}

/// A macro to forward an accessor to the corresponding inner matrix.
macro_rules! matrix_accessors {
    ($($field:ident),* $(,)?) => {
        $(
            pub fn $field(&self) -> &SparseMat<f64> {
                &self.inner.$field
            }
        )*
    };
}

impl Element {
    pub fn builder() -> ElementBuilder {
        ElementBuilder::default()
    }

    matrix_accessors!(mv, mi, mx, mxd, mq, mu, u0, pv, pi, px, pxd, pq);

    /// Number of branches.
    pub fn nb(&self) -> usize {
        self.inner.mv.ncols()
    }

    /// Number of continuous states.
    pub fn nx(&self) -> usize {
        self.inner.mx.ncols()
    }

    /// Number of nonlinear variables.
    pub fn nq(&self) -> usize {
        self.inner.mq.ncols()
    }

    /// Number of inputs.
    pub fn nu(&self) -> usize {
        self.inner.mu.ncols()
    }

    /// Number of linear equations.
    pub fn nl(&self) -> usize {
        self.inner.mv.nrows()
    }

    /// Number of outputs.
    pub fn ny(&self) -> usize {
        self.inner.pv.nrows()
    }

    /// Number of nonlinear equations.
    pub fn nn(&self) -> usize {
        self.nb() + self.nx() + self.nq() - self.nl()
    }

    pub fn nonlinear_eq(&self) -> &Expr {
        &self.inner.nonlinear_eq
    }

    pub fn pins(&self) -> &IndexMap<String, PinEnds> {
        &self.inner.pins
    }

    pub fn pin(&self, name: &str) -> Result<Pin> {
        let ends = self
            .inner
            .pins
            .get(name)
            .ok_or_else(|| Error::UnknownPin(name.to_string()))?;
        Ok(Pin {
            element: self.clone(),
            name: name.to_string(),
            ends: ends.clone(),
        })
    }

    /// Identity comparison: true only for clones of one construction.
    pub fn same_element(&self, other: &Element) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// An opaque handle to one pin of one element.
#[derive(Debug, Clone)]
pub struct Pin {
    element: Element,
    name: String,
    ends: PinEnds,
}

impl Pin {
    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ends(&self) -> &[(usize, i32)] {
        &self.ends
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strom_matrix::Triplet;

    fn mat(rows: usize, cols: usize, entries: &[(usize, usize, f64)]) -> SparseMat<f64> {
        let triplets: Vec<_> = entries
            .iter()
            .map(|&(r, c, v)| Triplet::new(r, c, v))
            .collect();
        SparseMat::from_triplets(rows, cols, &triplets)
    }

    #[test]
    fn test_resistor_like_element() {
        let element = Element::builder()
            .mv(mat(1, 1, &[(0, 0, 1.0)]))
            .mi(mat(1, 1, &[(0, 0, -1000.0)]))
            .build()
            .unwrap();
        assert_eq!(element.nb(), 1);
        assert_eq!(element.nl(), 1);
        assert_eq!(element.nx(), 0);
        assert_eq!(element.nq(), 0);
        assert_eq!(element.nu(), 0);
        assert_eq!(element.ny(), 0);
        assert_eq!(element.nn(), 0);
        assert_eq!(element.u0().nrows(), 1);
        assert_eq!(element.u0().ncols(), 1);
    }

    #[test]
    fn test_default_pins_follow_branch_convention() {
        let element = Element::builder().mv(mat(2, 2, &[])).build().unwrap();
        let pins = element.pins();
        assert_eq!(pins.len(), 4);
        assert_eq!(pins["1"], vec![(0, 1)]);
        assert_eq!(pins["2"], vec![(0, -1)]);
        assert_eq!(pins["3"], vec![(1, 1)]);
        assert_eq!(pins["4"], vec![(1, -1)]);
    }

    #[test]
    fn test_dimension_conflict() {
        let err = Element::builder()
            .mv(mat(2, 3, &[]))
            .mi(mat(2, 4, &[]))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionConflict {
                symbol: "nb",
                existing: 3,
                conflicting: 4,
            }
        ));
    }

    #[test]
    fn test_row_dimension_conflict() {
        let err = Element::builder()
            .mv(mat(1, 1, &[]))
            .mq(mat(2, 1, &[]))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::DimensionConflict { symbol: "nl", .. }));
    }

    #[test]
    fn test_u0_with_extra_columns_conflicts_on_n0() {
        let err = Element::builder()
            .mv(mat(1, 1, &[]))
            .u0(mat(1, 2, &[]))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::DimensionConflict { symbol: "n0", .. }));
    }

    #[test]
    fn test_missing_matrices_default_to_zero_dimensions() {
        let element = Element::builder()
            .mq(mat(2, 2, &[(0, 0, -1.0), (1, 1, -1.0)]))
            .build()
            .unwrap();
        assert_eq!(element.nb(), 0);
        assert_eq!(element.nq(), 2);
        assert_eq!(element.nl(), 2);
        assert_eq!(element.nn(), 0);
        assert_eq!(element.mv().nrows(), 2);
        assert_eq!(element.mv().ncols(), 0);
        assert!(element.pins().is_empty());
    }

    #[test]
    fn test_too_many_linear_equations() {
        let err = Element::builder().mv(mat(2, 1, &[])).build().unwrap_err();
        assert!(matches!(
            err,
            Error::ExtraLinearEquations { nl: 2, variables: 1 }
        ));
    }

    #[test]
    fn test_pin_out_of_range() {
        let err = Element::builder()
            .mv(mat(1, 1, &[(0, 0, 1.0)]))
            .pins([("a", vec![(1, 1)])])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::PinOutOfRange { branch: 1, nb: 1, .. }));
    }

    #[test]
    fn test_unknown_pin() {
        let element = Element::builder().mv(mat(1, 1, &[(0, 0, 1.0)])).build().unwrap();
        assert!(element.pin("1").is_ok());
        assert!(matches!(element.pin("5"), Err(Error::UnknownPin(_))));
    }

    #[test]
    fn test_clone_preserves_identity() {
        let element = Element::builder().mv(mat(1, 1, &[(0, 0, 1.0)])).build().unwrap();
        let clone = element.clone();
        let other = Element::builder().mv(mat(1, 1, &[(0, 0, 1.0)])).build().unwrap();
        assert!(element.same_element(&clone));
        assert!(!element.same_element(&other));
    }
}
