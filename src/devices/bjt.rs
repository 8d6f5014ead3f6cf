//! Bipolar junction transistor (Gummel-Poon DC model).
//!
//! Pins are collector, base, emitter, substrate. Ohmic resistances `RC`,
//! `RB` and `RE` each add an internal node; the junction equations are
//! written between the internal nodes.
//!
//! Only the DC characteristic is modeled: small-signal analysis uses the
//! operating-point conductances without junction or diffusion capacitances.

use std::sync::Arc;

use super::{
    check_pins, node_names, pnjlim, AllocationContext, Behavior, BiasingBehavior, Component,
    ComplexAllocation, ConvergenceContext, FrequencyBehavior, FrequencyContext, LoadContext,
};
use crate::algebra::{Element, EquationStore, MatrixSlot, RhsSlot};
use crate::circuit::{VariableKind, VariableSet};
use crate::error::{NodalError, Result};
use crate::simulation::{InitializationMode, SimulationState};
use crate::{K_OVER_Q, ROOT_2};

/// Transistor polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BjtPolarity {
    Npn,
    Pnp,
}

impl BjtPolarity {
    fn sign(self) -> f64 {
        match self {
            BjtPolarity::Npn => 1.0,
            BjtPolarity::Pnp => -1.0,
        }
    }
}

/// Parameters of a BJT model.
#[derive(Debug, Clone, PartialEq)]
pub struct BjtModel {
    pub name: String,
    pub polarity: BjtPolarity,
    /// Transport saturation current (IS)
    pub is: f64,
    /// Ideal forward beta (BF)
    pub bf: f64,
    /// Forward emission coefficient (NF)
    pub nf: f64,
    /// Forward Early voltage (VAF), 0 = infinite
    pub vaf: f64,
    /// Forward beta roll-off corner current (IKF), 0 = infinite
    pub ikf: f64,
    /// B-E leakage saturation current (ISE)
    pub ise: f64,
    /// B-E leakage emission coefficient (NE)
    pub ne: f64,
    /// Ideal reverse beta (BR)
    pub br: f64,
    /// Reverse emission coefficient (NR)
    pub nr: f64,
    /// Reverse Early voltage (VAR), 0 = infinite
    pub var: f64,
    /// Reverse beta roll-off corner current (IKR), 0 = infinite
    pub ikr: f64,
    /// B-C leakage saturation current (ISC)
    pub isc: f64,
    /// B-C leakage emission coefficient (NC)
    pub nc: f64,
    /// Zero-bias base resistance (RB)
    pub rb: f64,
    /// Current where base resistance falls halfway to its minimum (IRB), 0 = infinite
    pub irb: f64,
    /// Minimum base resistance (RBM), defaults to RB
    pub rbm: Option<f64>,
    /// Emitter resistance (RE)
    pub re: f64,
    /// Collector resistance (RC)
    pub rc: f64,
    /// Energy gap (EG)
    pub eg: f64,
    /// Saturation current temperature exponent (XTI)
    pub xti: f64,
    /// Forward and reverse beta temperature exponent (XTB)
    pub xtb: f64,
    /// Parameter measurement temperature in kelvin (TNOM)
    pub tnom: Option<f64>,
}

impl Default for BjtModel {
    fn default() -> Self {
        Self {
            name: String::new(),
            polarity: BjtPolarity::Npn,
            is: 1e-16,
            bf: 100.0,
            nf: 1.0,
            vaf: 0.0,
            ikf: 0.0,
            ise: 0.0,
            ne: 1.5,
            br: 1.0,
            nr: 1.0,
            var: 0.0,
            ikr: 0.0,
            isc: 0.0,
            nc: 2.0,
            rb: 0.0,
            irb: 0.0,
            rbm: None,
            re: 0.0,
            rc: 0.0,
            eg: 1.11,
            xti: 3.0,
            xtb: 0.0,
            tnom: None,
        }
    }
}

impl BjtModel {
    pub fn new(name: impl Into<String>, polarity: BjtPolarity) -> Self {
        Self {
            name: name.into(),
            polarity,
            ..Default::default()
        }
    }

    /// Set a parameter by its SPICE name (case-insensitive).
    ///
    /// `TNOM` is given in degrees Celsius. Capacitance, transit time and
    /// noise parameters are accepted and ignored.
    pub fn set(&mut self, param: &str, value: f64) -> Result<()> {
        match param.to_ascii_lowercase().as_str() {
            "is" => self.is = value,
            "bf" => self.bf = value,
            "nf" => self.nf = value,
            "vaf" | "va" => self.vaf = value,
            "ikf" | "ik" => self.ikf = value,
            "ise" => self.ise = value,
            "ne" => self.ne = value,
            "br" => self.br = value,
            "nr" => self.nr = value,
            "var" | "vb" => self.var = value,
            "ikr" => self.ikr = value,
            "isc" => self.isc = value,
            "nc" => self.nc = value,
            "rb" => self.rb = value,
            "irb" => self.irb = value,
            "rbm" => self.rbm = Some(value),
            "re" => self.re = value,
            "rc" => self.rc = value,
            "eg" => self.eg = value,
            "xti" => self.xti = value,
            "xtb" => self.xtb = value,
            "tnom" => self.tnom = Some(value + crate::CELSIUS_KELVIN),
            "cje" | "vje" | "mje" | "cjc" | "vjc" | "mjc" | "xcjc" | "cjs" | "vjs" | "mjs"
            | "tf" | "xtf" | "vtf" | "itf" | "ptf" | "tr" | "fc" | "kf" | "af" => {}
            other => {
                return Err(NodalError::invalid_parameter(
                    &self.name,
                    other,
                    "unknown bipolar model parameter",
                ))
            }
        }
        Ok(())
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, param: &str, value: f64) -> Result<Self> {
        self.set(param, value)?;
        Ok(self)
    }

    fn validate(&self, instance: &str) -> Result<()> {
        let positive = [
            ("is", self.is),
            ("bf", self.bf),
            ("br", self.br),
            ("nf", self.nf),
            ("nr", self.nr),
            ("ne", self.ne),
            ("nc", self.nc),
        ];
        for (param, value) in positive {
            if !(value > 0.0) {
                return Err(NodalError::invalid_parameter(instance, param, "must be positive"));
            }
        }
        let non_negative = [("rb", self.rb), ("re", self.re), ("rc", self.rc)];
        for (param, value) in non_negative {
            if value < 0.0 {
                return Err(NodalError::invalid_parameter(instance, param, "must be non-negative"));
            }
        }
        Ok(())
    }
}

/// A BJT instance: collector, base, emitter, substrate.
#[derive(Debug, Clone)]
pub struct Bjt {
    pub name: String,
    pub nodes: Vec<String>,
    pub model: Arc<BjtModel>,
    /// Area scale factor
    pub area: f64,
    /// Start both junctions at zero bias
    pub off: bool,
    /// Initial B-E and C-E voltages used when initial conditions are requested
    pub initial_vbe: f64,
    pub initial_vce: f64,
}

impl Bjt {
    pub fn new<S: AsRef<str>>(name: impl Into<String>, nodes: &[S], model: Arc<BjtModel>) -> Self {
        Self {
            name: name.into(),
            nodes: node_names(nodes),
            model,
            area: 1.0,
            off: false,
            initial_vbe: 0.0,
            initial_vce: 0.0,
        }
    }

    pub fn with_area(mut self, area: f64) -> Self {
        self.area = area;
        self
    }

    pub fn with_off(mut self, off: bool) -> Self {
        self.off = off;
        self
    }
}

impl Component for Bjt {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> &[String] {
        &self.nodes
    }

    fn create_behavior(&self) -> Result<Box<dyn Behavior>> {
        self.model.validate(&self.name)?;
        if !(self.area > 0.0) {
            return Err(NodalError::invalid_parameter(&self.name, "area", "must be positive"));
        }
        Ok(Box::new(BjtBehavior::new(self)))
    }
}

/// Temperature-adjusted parameters.
#[derive(Debug, Clone, Copy, Default)]
struct BjtTemperature {
    vt: f64,
    sat_cur: f64,
    beta_f: f64,
    beta_r: f64,
    be_leak: f64,
    bc_leak: f64,
    vcrit: f64,
    inv_early_f: f64,
    inv_early_r: f64,
    inv_roll_off_f: f64,
    inv_roll_off_r: f64,
    collector_conduct: f64,
    emitter_conduct: f64,
}

/// Linearized operating point of the last load.
#[derive(Debug, Clone, Copy, Default)]
struct OperatingPoint {
    vbe: f64,
    vbc: f64,
    cc: f64,
    cb: f64,
    gpi: f64,
    gmu: f64,
    gm: f64,
    go: f64,
    gx: f64,
    gcpr: f64,
    gepr: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct BjtSlots {
    c_c: MatrixSlot,
    b_b: MatrixSlot,
    e_e: MatrixSlot,
    cp_cp: MatrixSlot,
    bp_bp: MatrixSlot,
    ep_ep: MatrixSlot,
    c_cp: MatrixSlot,
    b_bp: MatrixSlot,
    e_ep: MatrixSlot,
    cp_c: MatrixSlot,
    cp_bp: MatrixSlot,
    cp_ep: MatrixSlot,
    bp_b: MatrixSlot,
    bp_cp: MatrixSlot,
    bp_ep: MatrixSlot,
    ep_e: MatrixSlot,
    ep_cp: MatrixSlot,
    ep_bp: MatrixSlot,
}

impl BjtSlots {
    fn reserve<T: Element>(store: &mut EquationStore<T>, nodes: &Nodes) -> Result<Self> {
        let Nodes {
            c, b, e, cp, bp, ep, ..
        } = *nodes;
        Ok(Self {
            c_c: store.reserve_matrix(c, c)?,
            b_b: store.reserve_matrix(b, b)?,
            e_e: store.reserve_matrix(e, e)?,
            cp_cp: store.reserve_matrix(cp, cp)?,
            bp_bp: store.reserve_matrix(bp, bp)?,
            ep_ep: store.reserve_matrix(ep, ep)?,
            c_cp: store.reserve_matrix(c, cp)?,
            b_bp: store.reserve_matrix(b, bp)?,
            e_ep: store.reserve_matrix(e, ep)?,
            cp_c: store.reserve_matrix(cp, c)?,
            cp_bp: store.reserve_matrix(cp, bp)?,
            cp_ep: store.reserve_matrix(cp, ep)?,
            bp_b: store.reserve_matrix(bp, b)?,
            bp_cp: store.reserve_matrix(bp, cp)?,
            bp_ep: store.reserve_matrix(bp, ep)?,
            ep_e: store.reserve_matrix(ep, e)?,
            ep_cp: store.reserve_matrix(ep, cp)?,
            ep_bp: store.reserve_matrix(ep, bp)?,
        })
    }

    fn stamp<T: Element>(&self, store: &mut EquationStore<T>, op: &OperatingPoint) {
        let g = T::from_real;
        let OperatingPoint {
            gpi,
            gmu,
            gm,
            go,
            gx,
            gcpr,
            gepr,
            ..
        } = *op;
        store.add(self.c_c, g(gcpr));
        store.add(self.b_b, g(gx));
        store.add(self.e_e, g(gepr));
        store.add(self.cp_cp, g(gmu + go + gcpr));
        store.add(self.bp_bp, g(gx + gpi + gmu));
        store.add(self.ep_ep, g(gpi + gepr + gm + go));
        store.add(self.c_cp, g(-gcpr));
        store.add(self.b_bp, g(-gx));
        store.add(self.e_ep, g(-gepr));
        store.add(self.cp_c, g(-gcpr));
        store.add(self.cp_bp, g(-gmu + gm));
        store.add(self.cp_ep, g(-gm - go));
        store.add(self.bp_b, g(-gx));
        store.add(self.bp_cp, g(-gmu));
        store.add(self.bp_ep, g(-gpi));
        store.add(self.ep_e, g(-gepr));
        store.add(self.ep_cp, g(-go));
        store.add(self.ep_bp, g(-gpi - gm));
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Nodes {
    c: usize,
    b: usize,
    e: usize,
    cp: usize,
    bp: usize,
    ep: usize,
}

#[derive(Debug)]
struct BjtBehavior {
    name: String,
    model: Arc<BjtModel>,
    area: f64,
    off: bool,
    initial_vbe: f64,
    initial_vce: f64,
    nodes: Nodes,
    temp: BjtTemperature,
    op: OperatingPoint,
    slots: BjtSlots,
    rhs_cp: RhsSlot,
    rhs_bp: RhsSlot,
    rhs_ep: RhsSlot,
    ac_slots: BjtSlots,
}

impl BjtBehavior {
    fn new(bjt: &Bjt) -> Self {
        Self {
            name: bjt.name.clone(),
            model: Arc::clone(&bjt.model),
            area: bjt.area,
            off: bjt.off,
            initial_vbe: bjt.initial_vbe,
            initial_vce: bjt.initial_vce,
            nodes: Nodes::default(),
            temp: BjtTemperature::default(),
            op: OperatingPoint::default(),
            slots: BjtSlots::default(),
            rhs_cp: RhsSlot::default(),
            rhs_bp: RhsSlot::default(),
            rhs_ep: RhsSlot::default(),
            ac_slots: BjtSlots::default(),
        }
    }

    /// Polarity-corrected junction voltages of the present solution.
    fn junction_voltages(&self, state: &SimulationState) -> (f64, f64) {
        let sign = self.model.polarity.sign();
        let Nodes { cp, bp, ep, .. } = self.nodes;
        (
            sign * state.voltage(bp, ep),
            sign * state.voltage(bp, cp),
        )
    }

    /// Junction voltages for the next load.
    fn initial_voltages(&self, state: &mut SimulationState) -> (f64, f64) {
        let sign = self.model.polarity.sign();
        match state.init {
            InitializationMode::Junction if state.use_dc && state.use_ic => {
                let vbe = sign * self.initial_vbe;
                let vce = sign * self.initial_vce;
                (vbe, vbe - vce)
            }
            InitializationMode::Junction if !self.off => (self.temp.vcrit, 0.0),
            InitializationMode::Junction => (0.0, 0.0),
            InitializationMode::Fix if self.off => (0.0, 0.0),
            _ => {
                let (vbe, vbc) = self.junction_voltages(state);
                let vt = self.temp.vt;
                let (vbe, limited_be) = pnjlim(vbe, self.op.vbe, vt, self.temp.vcrit);
                let (vbc, limited_bc) = pnjlim(vbc, self.op.vbc, vt, self.temp.vcrit);
                if limited_be || limited_bc {
                    state.is_convergent = false;
                }
                (vbe, vbc)
            }
        }
    }
}

impl Behavior for BjtBehavior {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, pins: &[usize]) -> Result<()> {
        check_pins(&self.name, 4, pins)?;
        self.nodes.c = pins[0];
        self.nodes.b = pins[1];
        // The substrate junction carries no DC current
        self.nodes.e = pins[2];
        Ok(())
    }

    fn biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
        Some(self)
    }

    fn frequency(&mut self) -> Option<&mut dyn FrequencyBehavior> {
        Some(self)
    }
}

impl BiasingBehavior for BjtBehavior {
    fn create_variables(&mut self, variables: &mut VariableSet) -> Result<()> {
        let model = &*self.model;
        let mut internal = |resistance: f64, external: usize, suffix: &str| -> Result<usize> {
            if resistance > 0.0 {
                variables.create(VariableSet::internal_name(&self.name, suffix), VariableKind::Voltage)
            } else {
                Ok(external)
            }
        };
        let cp = internal(model.rc, self.nodes.c, "col")?;
        let bp = internal(model.rb, self.nodes.b, "base")?;
        let ep = internal(model.re, self.nodes.e, "emit")?;
        self.nodes.cp = cp;
        self.nodes.bp = bp;
        self.nodes.ep = ep;
        Ok(())
    }

    fn allocate(&mut self, context: &mut AllocationContext<'_, f64>) -> Result<()> {
        self.slots = BjtSlots::reserve(context.store, &self.nodes)?;
        self.rhs_cp = context.store.reserve_rhs(self.nodes.cp)?;
        self.rhs_bp = context.store.reserve_rhs(self.nodes.bp)?;
        self.rhs_ep = context.store.reserve_rhs(self.nodes.ep)?;
        Ok(())
    }

    fn temperature(&mut self, state: &SimulationState) {
        let model = &*self.model;
        let temp = state.temperature;
        let tnom = model.tnom.unwrap_or(state.nominal_temperature);
        let inverse = |x: f64| if x != 0.0 { 1.0 / x } else { 0.0 };

        let vt = temp * K_OVER_Q;
        let ratlog = (temp / tnom).ln();
        let ratio1 = temp / tnom - 1.0;
        let factlog = ratio1 * model.eg / vt + model.xti * ratlog;
        let factor = factlog.exp();
        let bfactor = (ratlog * model.xtb).exp();

        self.temp = BjtTemperature {
            vt,
            sat_cur: model.is * factor,
            beta_f: model.bf * bfactor,
            beta_r: model.br * bfactor,
            be_leak: model.ise * (factlog / model.ne).exp() / bfactor,
            bc_leak: model.isc * (factlog / model.nc).exp() / bfactor,
            vcrit: vt * (vt / (ROOT_2 * model.is * self.area)).ln(),
            inv_early_f: inverse(model.vaf),
            inv_early_r: inverse(model.var),
            inv_roll_off_f: inverse(model.ikf),
            inv_roll_off_r: inverse(model.ikr),
            collector_conduct: inverse(model.rc),
            emitter_conduct: inverse(model.re),
        };
    }

    fn load(&mut self, context: &mut LoadContext<'_>) {
        let model = Arc::clone(&self.model);
        let t = self.temp;
        let area = self.area;
        let gmin = context.state.gmin;

        let csat = t.sat_cur * area;
        let rbpr = model.rbm.unwrap_or(model.rb) / area;
        let rbpi = model.rb / area - rbpr;
        let gcpr = t.collector_conduct * area;
        let gepr = t.emitter_conduct * area;
        let oik = t.inv_roll_off_f / area;
        let c2 = t.be_leak * area;
        let vte = model.ne * t.vt;
        let oikr = t.inv_roll_off_r / area;
        let c4 = t.bc_leak * area;
        let vtc = model.nc * t.vt;
        let xjrb = model.irb * area;

        let (vbe, vbc) = self.initial_voltages(context.state);

        // B-E junction
        let vtn = t.vt * model.nf;
        let (cbe, gbe, cben, gben) = if vbe > -5.0 * vtn {
            let evbe = (vbe / vtn).exp();
            let cbe = csat * (evbe - 1.0) + gmin * vbe;
            let gbe = csat * evbe / vtn + gmin;
            if c2 == 0.0 {
                (cbe, gbe, 0.0, 0.0)
            } else {
                let evben = (vbe / vte).exp();
                (cbe, gbe, c2 * (evben - 1.0), c2 * evben / vte)
            }
        } else {
            let gbe = -csat / vbe + gmin;
            let gben = -c2 / vbe;
            (gbe * vbe, gbe, gben * vbe, gben)
        };

        // B-C junction
        let vtn = t.vt * model.nr;
        let (cbc, gbc, cbcn, gbcn) = if vbc > -5.0 * vtn {
            let evbc = (vbc / vtn).exp();
            let cbc = csat * (evbc - 1.0) + gmin * vbc;
            let gbc = csat * evbc / vtn + gmin;
            if c4 == 0.0 {
                (cbc, gbc, 0.0, 0.0)
            } else {
                let evbcn = (vbc / vtc).exp();
                (cbc, gbc, c4 * (evbcn - 1.0), c4 * evbcn / vtc)
            }
        } else {
            let gbc = -csat / vbc + gmin;
            let gbcn = -c4 / vbc;
            (gbc * vbc, gbc, gbcn * vbc, gbcn)
        };

        // Base charge
        let q1 = 1.0 / (1.0 - t.inv_early_f * vbc - t.inv_early_r * vbe);
        let (qb, dqbdve, dqbdvc) = if oik == 0.0 && oikr == 0.0 {
            (q1, q1 * q1 * t.inv_early_r, q1 * q1 * t.inv_early_f)
        } else {
            let q2 = oik * cbe + oikr * cbc;
            let arg = (1.0 + 4.0 * q2).max(0.0);
            let sqarg = if arg == 0.0 { 1.0 } else { arg.sqrt() };
            let qb = q1 * (1.0 + sqarg) / 2.0;
            (
                qb,
                q1 * (qb * t.inv_early_r + oik * gbe / sqarg),
                q1 * (qb * t.inv_early_f + oikr * gbc / sqarg),
            )
        };

        // Terminal currents and incremental conductances
        let cc = (cbe - cbc) / qb - cbc / t.beta_r - cbcn;
        let cb = cbe / t.beta_f + cben + cbc / t.beta_r + cbcn;
        let mut gx = rbpr + rbpi / qb;
        if xjrb != 0.0 {
            let arg1 = (cb / xjrb).max(1e-9);
            let arg2 = (-1.0 + (1.0 + 14.59025 * arg1).sqrt()) / 2.4317 / arg1.sqrt();
            let arg1 = arg2.tan();
            gx = rbpr + 3.0 * rbpi * (arg1 - arg2) / arg2 / arg1 / arg1;
        }
        if gx != 0.0 {
            gx = 1.0 / gx;
        }
        let gpi = gbe / t.beta_f + gben;
        let gmu = gbc / t.beta_r + gbcn;
        let go = (gbc + (cbe - cbc) * dqbdvc / qb) / qb;
        let gm = (gbe - (cbe - cbc) * dqbdve / qb) / qb - go;

        self.op = OperatingPoint {
            vbe,
            vbc,
            cc,
            cb,
            gpi,
            gmu,
            gm,
            go,
            gx,
            gcpr,
            gepr,
        };

        let sign = model.polarity.sign();
        let ceqbe = sign * (cc + cb - vbe * (gm + go + gpi) + vbc * go);
        let ceqbc = sign * (-cc + vbe * (gm + go) - vbc * (gmu + go));
        let store = &mut *context.store;
        store.add_rhs(self.rhs_cp, ceqbc);
        store.add_rhs(self.rhs_bp, -ceqbe - ceqbc);
        store.add_rhs(self.rhs_ep, ceqbe);
        self.slots.stamp(store, &self.op);
    }

    fn is_convergent(&mut self, context: &mut ConvergenceContext<'_>) -> bool {
        let (vbe, vbc) = self.junction_voltages(context.state);
        let op = self.op;
        let delvbe = vbe - op.vbe;
        let delvbc = vbc - op.vbc;
        let cchat = op.cc + (op.gm + op.go) * delvbe - (op.go + op.gmu) * delvbc;
        let cbhat = op.cb + op.gpi * delvbe + op.gmu * delvbc;

        let config = context.config;
        let within = |hat: f64, actual: f64| {
            let tol = config.rel_tol * hat.abs().max(actual.abs()) + config.abs_tol;
            (hat - actual).abs() <= tol
        };
        if !within(cchat, op.cc) || !within(cbhat, op.cb) {
            context.state.is_convergent = false;
            return false;
        }
        true
    }
}

impl FrequencyBehavior for BjtBehavior {
    fn allocate(&mut self, context: &mut ComplexAllocation<'_>) -> Result<()> {
        self.ac_slots = BjtSlots::reserve(context.store, &self.nodes)?;
        Ok(())
    }

    fn load(&mut self, context: &mut FrequencyContext<'_>) {
        self.ac_slots.stamp(context.store, &self.op);
    }
}
