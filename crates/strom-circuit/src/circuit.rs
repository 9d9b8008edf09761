use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::expr::offset_nonlinear_refs;
use crate::prelude::*;
use crate::topology;

/// A handle to one net: an equivalence class of electrically connected
/// pins, stored as `(branch, polarity)` entries in whole-circuit branch
/// numbering.
///
/// Handles stay valid across merges: when two nets are joined the
/// survivor keeps its identity and every name binding to the absorbed
/// net is rewritten before that net is dropped.
#[derive(Debug, Clone)]
pub struct NetRef {
    entries: Rc<RefCell<Vec<(usize, i32)>>>,
}

impl NetRef {
    fn new() -> Self {
        Self {
            entries: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn from_entries(entries: Vec<(usize, i32)>) -> Self {
        Self {
            entries: Rc::new(RefCell::new(entries)),
        }
    }

    pub fn entries(&self) -> Vec<(usize, i32)> {
        self.entries.borrow().clone()
    }

    /// Identity comparison: true only for handles to the same net.
    pub fn same_net(&self, other: &NetRef) -> bool {
        Rc::ptr_eq(&self.entries, &other.entries)
    }
}

impl PartialEq for NetRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_net(other)
    }
}

impl Eq for NetRef {}

/// Anything `connect` accepts: a pin of an element, or a named net such
/// as `"gnd"`.
#[derive(Debug, Clone)]
pub enum Terminal {
    Pin(Pin),
    Net(String),
}

impl From<Pin> for Terminal {
    fn from(pin: Pin) -> Self {
        Terminal::Pin(pin)
    }
}

impl From<&str> for Terminal {
    fn from(name: &str) -> Self {
        Terminal::Net(name.to_string())
    }
}

impl From<String> for Terminal {
    fn from(name: String) -> Self {
        Terminal::Net(name)
    }
}

/// A mutable collection of elements and nets.
///
/// Insertion order fixes the global branch, state and nonlinear
/// variable numbering: whole-circuit quantities concatenate per-element
/// quantities in the order elements were added.
#[derive(Debug, Default)]
pub struct Circuit {
    elements: Vec<Element>,
    nets: Vec<NetRef>,
    net_names: HashMap<String, NetRef>,
}

impl Circuit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an element, appending one singleton net per pin. Adding an
    /// element that is already present does nothing.
    pub fn add(&mut self, element: &Element) {
        if self.elements.iter().any(|e| e.same_element(element)) {
            return;
        }
        let branch_offset = self.nb();
        self.elements.push(element.clone());
        for ends in element.pins().values() {
            let entries = ends
                .iter()
                .map(|&(branch, polarity)| (branch_offset + branch, polarity))
                .collect();
            self.nets.push(NetRef::from_entries(entries));
        }
    }

    pub fn add_all<'a, I>(&mut self, elements: I)
    where
        I: IntoIterator<Item = &'a Element>,
    {
        for element in elements {
            self.add(element);
        }
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Live nets, in creation order. Rows of [`Circuit::incidence`] use
    /// this order.
    pub fn nets(&self) -> &[NetRef] {
        &self.nets
    }

    /// Current name bindings. After merges, every alias of a merged net
    /// resolves to the survivor.
    pub fn net_names(&self) -> &HashMap<String, NetRef> {
        &self.net_names
    }

    /// Index of the element's first branch in whole-circuit numbering.
    pub fn branch_offset(&self, element: &Element) -> Result<usize> {
        let mut offset = 0;
        for e in &self.elements {
            if e.same_element(element) {
                return Ok(offset);
            }
            offset += e.nb();
        }
        Err(Error::UnknownElement)
    }

    /// The net a pin currently belongs to, adding its element first if
    /// necessary.
    pub fn net_for_pin(&mut self, pin: &Pin) -> Result<NetRef> {
        self.add(pin.element());
        let branch_offset = self.branch_offset(pin.element())?;
        for net in &self.nets {
            let entries = net.entries.borrow();
            if pin
                .ends()
                .iter()
                .any(|&(branch, polarity)| entries.contains(&(branch_offset + branch, polarity)))
            {
                return Ok(net.clone());
            }
        }
        Err(Error::UnknownPin(pin.name().to_string()))
    }

    /// The net registered under `name`, creating an empty one on first
    /// use. This is how named nets like `"gnd"` enter the circuit
    /// before any pin connects to them.
    pub fn net_for_name(&mut self, name: &str) -> NetRef {
        if let Some(net) = self.net_names.get(name) {
            return net.clone();
        }
        let net = NetRef::new();
        self.nets.push(net.clone());
        self.net_names.insert(name.to_string(), net.clone());
        net
    }

    /// Electrically joins all given terminals into one net.
    ///
    /// The first-resolved net survives; the others are emptied into it,
    /// removed from the net list, and every name binding to them is
    /// rewritten to the survivor.
    pub fn connect<I, T>(&mut self, terminals: I) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<Terminal>,
    {
        let mut resolved: Vec<NetRef> = Vec::new();
        for terminal in terminals {
            let net = match terminal.into() {
                Terminal::Pin(pin) => self.net_for_pin(&pin)?,
                Terminal::Net(name) => self.net_for_name(&name),
            };
            if !resolved.iter().any(|n| n.same_net(&net)) {
                resolved.push(net);
            }
        }
        let Some((survivor, absorbed)) = resolved.split_first() else {
            return Ok(());
        };
        for net in absorbed {
            debug!(
                "merging net with {} entries into survivor",
                net.entries.borrow().len()
            );
            survivor
                .entries
                .borrow_mut()
                .append(&mut net.entries.borrow_mut());
            self.nets.retain(|n| !n.same_net(net));
            for bound in self.net_names.values_mut() {
                if bound.same_net(net) {
                    *bound = survivor.clone();
                }
            }
        }
        Ok(())
    }

    /// Total branch count.
    pub fn nb(&self) -> usize {
        self.elements.iter().map(Element::nb).sum()
    }

    /// Total state count.
    pub fn nx(&self) -> usize {
        self.elements.iter().map(Element::nx).sum()
    }

    /// Total nonlinear variable count.
    pub fn nq(&self) -> usize {
        self.elements.iter().map(Element::nq).sum()
    }

    /// Total input count.
    pub fn nu(&self) -> usize {
        self.elements.iter().map(Element::nu).sum()
    }

    /// Total linear equation count.
    pub fn nl(&self) -> usize {
        self.elements.iter().map(Element::nl).sum()
    }

    /// Total output count.
    pub fn ny(&self) -> usize {
        self.elements.iter().map(Element::ny).sum()
    }

    /// Total nonlinear equation count.
    pub fn nn(&self) -> usize {
        self.elements.iter().map(Element::nn).sum()
    }

    fn assemble(&self, matrix: impl Fn(&Element) -> &SparseMat<f64>) -> SparseMat<f64> {
        let blocks: Vec<&SparseMat<f64>> = self.elements.iter().map(matrix).collect();
        SparseMat::block_diag(&blocks)
    }

    pub fn mv(&self) -> SparseMat<f64> {
        self.assemble(Element::mv)
    }

    pub fn mi(&self) -> SparseMat<f64> {
        self.assemble(Element::mi)
    }

    pub fn mx(&self) -> SparseMat<f64> {
        self.assemble(Element::mx)
    }

    pub fn mxd(&self) -> SparseMat<f64> {
        self.assemble(Element::mxd)
    }

    pub fn mq(&self) -> SparseMat<f64> {
        self.assemble(Element::mq)
    }

    pub fn mu(&self) -> SparseMat<f64> {
        self.assemble(Element::mu)
    }

    pub fn pv(&self) -> SparseMat<f64> {
        self.assemble(Element::pv)
    }

    pub fn pi(&self) -> SparseMat<f64> {
        self.assemble(Element::pi)
    }

    pub fn px(&self) -> SparseMat<f64> {
        self.assemble(Element::px)
    }

    pub fn pxd(&self) -> SparseMat<f64> {
        self.assemble(Element::pxd)
    }

    pub fn pq(&self) -> SparseMat<f64> {
        self.assemble(Element::pq)
    }

    /// Constant terms, stacked in insertion order.
    pub fn u0(&self) -> SparseMat<f64> {
        let blocks: Vec<&SparseMat<f64>> = self.elements.iter().map(Element::u0).collect();
        SparseMat::vstack(&blocks)
    }

    /// The combined nonlinear equation block: each element's equations
    /// with `res`/`J` rows moved by the preceding nonlinear equation
    /// count and `q`/`J` columns by the preceding nonlinear variable
    /// count, each wrapped in its own scope so element-local bindings
    /// do not leak.
    pub fn nonlinear_eq(&self) -> Result<Expr> {
        let mut row_offset = 0i64;
        let mut col_offset = 0i64;
        let mut scopes = Vec::new();
        for element in &self.elements {
            let rewritten = offset_nonlinear_refs(element.nonlinear_eq(), row_offset, col_offset)?;
            scopes.push(Expr::Scope(Box::new(rewritten)));
            row_offset += element.nn() as i64;
            col_offset += element.nq() as i64;
        }
        Ok(Expr::Block(scopes))
    }

    /// The net-branch incidence matrix: one row per live net, one
    /// column per branch, entries the polarity of the branch end in the
    /// net. A branch whose both ends fell into the same net cancels to
    /// a structural zero.
    pub fn incidence(&self) -> SparseMat<i32> {
        let mut triplets = Vec::new();
        for (row, net) in self.nets.iter().enumerate() {
            for &(branch, polarity) in net.entries.borrow().iter() {
                triplets.push(Triplet::new(row, branch, polarity));
            }
        }
        SparseMat::from_triplets(self.nets.len(), self.nb(), &triplets)
    }

    /// Kirchhoff tie and cutset matrices of the assembled circuit.
    pub fn topomat(&self) -> Result<(SparseMat<i32>, SparseMat<i32>)> {
        topology::topomat(&self.incidence())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resistor(r: f64) -> Element {
        let mut mv = SparseMat::zeros(1, 1);
        mv.insert(0, 0, 1.0);
        let mut mi = SparseMat::zeros(1, 1);
        mi.insert(0, 0, -r);
        Element::builder().mv(mv).mi(mi).build().unwrap()
    }

    #[test]
    fn test_add_is_idempotent() {
        let r = resistor(1e3);
        let mut circuit = Circuit::new();
        circuit.add(&r);
        circuit.add(&r);
        assert_eq!(circuit.elements().len(), 1);
        assert_eq!(circuit.nets().len(), 2);
        assert_eq!(circuit.nb(), 1);
    }

    #[test]
    fn test_add_creates_one_net_per_pin() {
        let mut circuit = Circuit::new();
        circuit.add(&resistor(1e3));
        circuit.add(&resistor(2e3));
        assert_eq!(circuit.nets().len(), 4);
        let entries: Vec<_> = circuit.nets().iter().map(NetRef::entries).collect();
        assert_eq!(entries[0], vec![(0, 1)]);
        assert_eq!(entries[1], vec![(0, -1)]);
        assert_eq!(entries[2], vec![(1, 1)]);
        assert_eq!(entries[3], vec![(1, -1)]);
    }

    #[test]
    fn test_branch_offset() {
        let r1 = resistor(1e3);
        let r2 = resistor(2e3);
        let mut circuit = Circuit::new();
        circuit.add_all([&r1, &r2]);
        assert_eq!(circuit.branch_offset(&r1).unwrap(), 0);
        assert_eq!(circuit.branch_offset(&r2).unwrap(), 1);
        let stray = resistor(3e3);
        assert!(matches!(
            circuit.branch_offset(&stray),
            Err(Error::UnknownElement)
        ));
    }

    #[test]
    fn test_net_for_pin_adds_the_element() {
        let r = resistor(1e3);
        let mut circuit = Circuit::new();
        let net = circuit.net_for_pin(&r.pin("1").unwrap()).unwrap();
        assert_eq!(circuit.elements().len(), 1);
        assert_eq!(net.entries(), vec![(0, 1)]);
    }

    #[test]
    fn test_net_for_name_registers_once() {
        let mut circuit = Circuit::new();
        let gnd = circuit.net_for_name("gnd");
        let again = circuit.net_for_name("gnd");
        assert!(gnd.same_net(&again));
        assert_eq!(circuit.nets().len(), 1);
    }

    #[test]
    fn test_connect_keeps_first_seen_net_and_rewrites_names() {
        let r1 = resistor(1e3);
        let r2 = resistor(2e3);
        let mut circuit = Circuit::new();
        let named = circuit.net_for_name("mid");
        circuit
            .connect([
                Terminal::from(r1.pin("2").unwrap()),
                Terminal::from("mid"),
                Terminal::from(r2.pin("1").unwrap()),
            ])
            .unwrap();
        let survivor = circuit.net_for_pin(&r1.pin("2").unwrap()).unwrap();
        assert!(!survivor.same_net(&named));
        assert!(circuit.net_names()["mid"].same_net(&survivor));
        assert_eq!(survivor.entries(), vec![(0, -1), (1, 1)]);
        // two untouched pin nets plus the survivor
        assert_eq!(circuit.nets().len(), 3);
    }

    #[test]
    fn test_connect_deduplicates_terminals() {
        let r = resistor(1e3);
        let mut circuit = Circuit::new();
        circuit
            .connect([r.pin("1").unwrap(), r.pin("1").unwrap()])
            .unwrap();
        assert_eq!(circuit.nets().len(), 2);
        assert_eq!(
            circuit.net_for_pin(&r.pin("1").unwrap()).unwrap().entries(),
            vec![(0, 1)]
        );
    }

    #[test]
    fn test_every_branch_end_stays_in_exactly_one_net() {
        let r1 = resistor(1e3);
        let r2 = resistor(2e3);
        let r3 = resistor(3e3);
        let mut circuit = Circuit::new();
        circuit.add_all([&r1, &r2, &r3]);
        circuit
            .connect([
                Terminal::from(r1.pin("1").unwrap()),
                Terminal::from(r2.pin("1").unwrap()),
                Terminal::from(r3.pin("1").unwrap()),
            ])
            .unwrap();
        circuit
            .connect([Terminal::from(r2.pin("2").unwrap()), Terminal::from("gnd")])
            .unwrap();

        let mut seen: Vec<(usize, i32)> = Vec::new();
        for net in circuit.nets() {
            for entry in net.entries() {
                assert!(!seen.contains(&entry), "{entry:?} appears in two nets");
                seen.push(entry);
            }
        }
        assert_eq!(seen.len(), 2 * circuit.nb());
    }

    #[test]
    fn test_dimension_sums() {
        let mut circuit = Circuit::new();
        circuit.add(&resistor(1e3));
        circuit.add(&resistor(2e3));
        assert_eq!(circuit.nb(), 2);
        assert_eq!(circuit.nl(), 2);
        assert_eq!(circuit.nx(), 0);
        assert_eq!(circuit.nq(), 0);
        assert_eq!(circuit.nu(), 0);
        assert_eq!(circuit.ny(), 0);
        assert_eq!(circuit.nn(), 0);
    }

    #[test]
    fn test_matrices_assemble_block_diagonally() {
        let mut circuit = Circuit::new();
        circuit.add(&resistor(1e3));
        circuit.add(&resistor(2e3));
        let mv = circuit.mv();
        assert_eq!(mv.nrows(), 2);
        assert_eq!(mv.ncols(), 2);
        assert_eq!(mv.get(0, 0), 1.0);
        assert_eq!(mv.get(1, 1), 1.0);
        assert_eq!(mv.get(0, 1), 0.0);
        let mi = circuit.mi();
        assert_eq!(mi.get(0, 0), -1e3);
        assert_eq!(mi.get(1, 1), -2e3);
        assert_eq!(mi.get(1, 0), 0.0);
        let u0 = circuit.u0();
        assert_eq!(u0.nrows(), 2);
        assert_eq!(u0.ncols(), 1);
    }

    #[test]
    fn test_incidence_columns_sum_to_zero() {
        let r1 = resistor(1e3);
        let r2 = resistor(2e3);
        let mut circuit = Circuit::new();
        circuit
            .connect([r1.pin("1").unwrap(), r2.pin("1").unwrap()])
            .unwrap();
        circuit
            .connect([
                Terminal::from(r1.pin("2").unwrap()),
                Terminal::from("gnd"),
            ])
            .unwrap();
        circuit
            .connect([
                Terminal::from(r2.pin("2").unwrap()),
                Terminal::from("gnd"),
            ])
            .unwrap();
        let incidence = circuit.incidence();
        assert_eq!(incidence.nrows(), 2);
        assert_eq!(incidence.ncols(), 2);
        for col in 0..incidence.ncols() {
            assert_eq!(incidence.col_sum(col), 0);
        }
    }
}
