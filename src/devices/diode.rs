//! Junction diode.
//!
//! DC characteristic in three regions:
//!
//! ```text
//! forward   vd >= -3 nVt        Id = Is (exp(vd / nVt) - 1)
//! reverse   -BV < vd < -3 nVt   Id = -Is (1 + (3 nVt / (e vd))^3)
//! breakdown vd <= -BV           Id = -Is exp(-(BV + vd) / nVt)
//! ```
//!
//! plus `gmin` in parallel. A series resistance `RS` adds an internal node
//! between the anode and the junction. Charge storage combines diffusion
//! charge (`TT * Id`) with depletion charge, linearized above `FC * VJ`.

use std::sync::Arc;

use num_complex::Complex64;

use super::{
    check_pins, node_names, pnjlim, AllocationContext, Behavior, BiasingBehavior, Component,
    ComplexAllocation, ConvergenceContext, FrequencyBehavior, FrequencyContext, LoadContext,
    TransientBehavior, TransientContext,
};
use crate::algebra::{Element, EquationStore, MatrixSlot, RhsSlot};
use crate::circuit::{VariableKind, VariableSet};
use crate::error::{NodalError, Result};
use crate::integration::{IntegrationMethod, StateDerivative};
use crate::simulation::{InitializationMode, SimulationState, DEFAULT_REL_TOL};
use crate::{BOLTZMANN, CHARGE, K_OVER_Q, REFERENCE_TEMPERATURE, ROOT_2};

/// Parameters of a diode model.
#[derive(Debug, Clone, PartialEq)]
pub struct DiodeModel {
    pub name: String,
    /// Saturation current (IS)
    pub is: f64,
    /// Ohmic series resistance (RS)
    pub rs: f64,
    /// Emission coefficient (N)
    pub n: f64,
    /// Transit time (TT)
    pub tt: f64,
    /// Zero-bias junction capacitance (CJO)
    pub cjo: f64,
    /// Junction potential (VJ)
    pub vj: f64,
    /// Grading coefficient (M)
    pub m: f64,
    /// Activation energy (EG)
    pub eg: f64,
    /// Saturation current temperature exponent (XTI)
    pub xti: f64,
    /// Forward bias depletion capacitance coefficient (FC)
    pub fc: f64,
    /// Reverse breakdown voltage (BV)
    pub bv: Option<f64>,
    /// Current at breakdown voltage (IBV)
    pub ibv: f64,
    /// Parameter measurement temperature in kelvin (TNOM)
    pub tnom: Option<f64>,
}

impl Default for DiodeModel {
    fn default() -> Self {
        Self {
            name: String::new(),
            is: 1e-14,
            rs: 0.0,
            n: 1.0,
            tt: 0.0,
            cjo: 0.0,
            vj: 1.0,
            m: 0.5,
            eg: 1.11,
            xti: 3.0,
            fc: 0.5,
            bv: None,
            ibv: 1e-3,
            tnom: None,
        }
    }
}

impl DiodeModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set a parameter by its SPICE name (case-insensitive).
    ///
    /// `TNOM` is given in degrees Celsius.
    pub fn set(&mut self, param: &str, value: f64) -> Result<()> {
        match param.to_ascii_lowercase().as_str() {
            "is" => self.is = value,
            "rs" => self.rs = value,
            "n" => self.n = value,
            "tt" => self.tt = value,
            "cjo" | "cj0" | "cj" => self.cjo = value,
            "vj" | "pb" => self.vj = value,
            "m" | "mj" => self.m = value,
            "eg" => self.eg = value,
            "xti" => self.xti = value,
            "fc" => self.fc = value,
            "bv" => self.bv = Some(value),
            "ibv" => self.ibv = value,
            "tnom" => self.tnom = Some(value + crate::CELSIUS_KELVIN),
            // Noise parameters have no effect on the analyses
            "kf" | "af" => {}
            other => {
                return Err(NodalError::invalid_parameter(
                    &self.name,
                    other,
                    "unknown diode model parameter",
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
        if !(self.is > 0.0) {
            return Err(NodalError::invalid_parameter(instance, "is", "must be positive"));
        }
        if !(self.n > 0.0) {
            return Err(NodalError::invalid_parameter(instance, "n", "must be positive"));
        }
        if self.rs < 0.0 {
            return Err(NodalError::invalid_parameter(instance, "rs", "must be non-negative"));
        }
        if !(self.vj > 0.0) {
            return Err(NodalError::invalid_parameter(instance, "vj", "must be positive"));
        }
        if let Some(bv) = self.bv {
            if !(bv > 0.0) {
                return Err(NodalError::invalid_parameter(instance, "bv", "must be positive"));
            }
        }
        Ok(())
    }
}

/// A diode instance: anode, cathode.
#[derive(Debug, Clone)]
pub struct Diode {
    pub name: String,
    pub nodes: Vec<String>,
    pub model: Arc<DiodeModel>,
    /// Area scale factor
    pub area: f64,
    /// Start the junction at zero bias
    pub off: bool,
}

impl Diode {
    pub fn new<S: AsRef<str>>(name: impl Into<String>, nodes: &[S], model: Arc<DiodeModel>) -> Self {
        Self {
            name: name.into(),
            nodes: node_names(nodes),
            model,
            area: 1.0,
            off: false,
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

impl Component for Diode {
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
        Ok(Box::new(DiodeBehavior::new(self)))
    }
}

/// Temperature-adjusted parameters.
#[derive(Debug, Clone, Copy, Default)]
struct DiodeTemperature {
    vt: f64,
    sat_cur: f64,
    jct_cap: f64,
    jct_pot: f64,
    dep_cap: f64,
    vcrit: f64,
    breakdown: Option<f64>,
    f1: f64,
    f2: f64,
    f3: f64,
    m: f64,
    conductance: f64,
}

/// Slots of a junction in series with a resistance.
#[derive(Debug, Clone, Copy, Default)]
struct DiodeSlots {
    pos_pos: MatrixSlot,
    neg_neg: MatrixSlot,
    prime_prime: MatrixSlot,
    pos_prime: MatrixSlot,
    prime_pos: MatrixSlot,
    neg_prime: MatrixSlot,
    prime_neg: MatrixSlot,
}

impl DiodeSlots {
    fn reserve<T: Element>(store: &mut EquationStore<T>, pos: usize, neg: usize, prime: usize) -> Result<Self> {
        Ok(Self {
            pos_pos: store.reserve_matrix(pos, pos)?,
            neg_neg: store.reserve_matrix(neg, neg)?,
            prime_prime: store.reserve_matrix(prime, prime)?,
            pos_prime: store.reserve_matrix(pos, prime)?,
            prime_pos: store.reserve_matrix(prime, pos)?,
            neg_prime: store.reserve_matrix(neg, prime)?,
            prime_neg: store.reserve_matrix(prime, neg)?,
        })
    }

    /// Stamp series conductance `gspr` and junction admittance `y`.
    fn stamp<T: Element>(&self, store: &mut EquationStore<T>, gspr: T, y: T) {
        store.add(self.pos_pos, gspr);
        store.add(self.neg_neg, y);
        store.add(self.prime_prime, y + gspr);
        store.add(self.pos_prime, -gspr);
        store.add(self.prime_pos, -gspr);
        store.add(self.neg_prime, -y);
        store.add(self.prime_neg, -y);
    }
}

#[derive(Debug)]
struct DiodeBehavior {
    name: String,
    model: Arc<DiodeModel>,
    area: f64,
    off: bool,
    pos: usize,
    neg: usize,
    /// Internal anode, equal to `pos` without series resistance
    prime: usize,
    temp: DiodeTemperature,
    slots: DiodeSlots,
    rhs_prime: RhsSlot,
    rhs_neg: RhsSlot,
    charge: Option<StateDerivative>,
    ac_slots: DiodeSlots,
    /// Junction voltage, current and conductance of the last load
    vd: f64,
    cd: f64,
    gd: f64,
    capacitance: f64,
}

impl DiodeBehavior {
    fn new(diode: &Diode) -> Self {
        Self {
            name: diode.name.clone(),
            model: Arc::clone(&diode.model),
            area: diode.area,
            off: diode.off,
            pos: 0,
            neg: 0,
            prime: 0,
            temp: DiodeTemperature::default(),
            slots: DiodeSlots::default(),
            rhs_prime: RhsSlot::default(),
            rhs_neg: RhsSlot::default(),
            charge: None,
            ac_slots: DiodeSlots::default(),
            vd: 0.0,
            cd: 0.0,
            gd: 0.0,
            capacitance: 0.0,
        }
    }

    /// Junction charge and capacitance at `vd`.
    fn charge_and_capacitance(&self, vd: f64) -> (f64, f64) {
        let tt = self.model.tt;
        let t = &self.temp;
        let czero = t.jct_cap * self.area;
        let m = t.m;
        if vd < t.dep_cap {
            let arg = 1.0 - vd / t.jct_pot;
            let sarg = (-m * arg.ln()).exp();
            let q = tt * self.cd + t.jct_pot * czero * (1.0 - arg * sarg) / (1.0 - m);
            let c = tt * self.gd + czero * sarg;
            (q, c)
        } else {
            let czof2 = czero / t.f2;
            let q = tt * self.cd
                + czero * t.f1
                + czof2
                    * (t.f3 * (vd - t.dep_cap)
                        + m / (2.0 * t.jct_pot) * (vd * vd - t.dep_cap * t.dep_cap));
            let c = tt * self.gd + czof2 * (t.f3 + m * vd / t.jct_pot);
            (q, c)
        }
    }
}

impl Behavior for DiodeBehavior {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, pins: &[usize]) -> Result<()> {
        check_pins(&self.name, 2, pins)?;
        self.pos = pins[0];
        self.neg = pins[1];
        Ok(())
    }

    fn biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
        Some(self)
    }

    fn transient(&mut self) -> Option<&mut dyn TransientBehavior> {
        Some(self)
    }

    fn frequency(&mut self) -> Option<&mut dyn FrequencyBehavior> {
        Some(self)
    }
}

impl BiasingBehavior for DiodeBehavior {
    fn create_variables(&mut self, variables: &mut VariableSet) -> Result<()> {
        self.prime = if self.model.rs > 0.0 {
            variables.create(VariableSet::internal_name(&self.name, "pos"), VariableKind::Voltage)?
        } else {
            self.pos
        };
        Ok(())
    }

    fn allocate(&mut self, context: &mut AllocationContext<'_, f64>) -> Result<()> {
        self.slots = DiodeSlots::reserve(context.store, self.pos, self.neg, self.prime)?;
        self.rhs_prime = context.store.reserve_rhs(self.prime)?;
        self.rhs_neg = context.store.reserve_rhs(self.neg)?;
        Ok(())
    }

    fn temperature(&mut self, state: &SimulationState) {
        let model = &*self.model;
        let temp = state.temperature;
        let tnom = model.tnom.unwrap_or(state.nominal_temperature);

        let mut m = model.m;
        if m > 0.9 {
            log::warn!("{}: grading coefficient too large, limited to 0.9", self.name);
            m = 0.9;
        }
        let mut eg = model.eg;
        if eg < 0.1 {
            log::warn!("{}: activation energy too small, limited to 0.1", self.name);
            eg = 0.1;
        }
        let mut fc = model.fc;
        if fc > 0.95 {
            log::warn!("{}: coefficient FC too large, limited to 0.95", self.name);
            fc = 0.95;
        }

        let xfc = (1.0 - fc).ln();
        let vt = K_OVER_Q * temp;
        let vtnom = K_OVER_Q * tnom;

        // Junction potential and capacitance
        let fact2 = temp / REFERENCE_TEMPERATURE;
        let egfet = 1.16 - (7.02e-4 * temp * temp) / (temp + 1108.0);
        let arg = -egfet / (2.0 * BOLTZMANN * temp)
            + 1.1150877 / (BOLTZMANN * (REFERENCE_TEMPERATURE + REFERENCE_TEMPERATURE));
        let pbfact = -2.0 * vt * (1.5 * fact2.ln() + CHARGE * arg);
        let egfet1 = 1.16 - (7.02e-4 * tnom * tnom) / (tnom + 1108.0);
        let arg1 = -egfet1 / (BOLTZMANN * 2.0 * tnom)
            + 1.1150877 / (2.0 * BOLTZMANN * REFERENCE_TEMPERATURE);
        let fact1 = tnom / REFERENCE_TEMPERATURE;
        let pbfact1 = -2.0 * vtnom * (1.5 * fact1.ln() + CHARGE * arg1);
        let pbo = (model.vj - pbfact1) / fact1;
        let gmaold = (model.vj - pbo) / pbo;
        let mut jct_cap = model.cjo / (1.0 + m * (4e-4 * (tnom - REFERENCE_TEMPERATURE) - gmaold));
        let jct_pot = pbfact + fact2 * pbo;
        let gmanew = (jct_pot - pbo) / pbo;
        jct_cap *= 1.0 + m * (4e-4 * (temp - REFERENCE_TEMPERATURE) - gmanew);

        let sat_cur = model.is
            * (((temp / tnom) - 1.0) * eg / (model.n * vt)
                + model.xti / model.n * (temp / tnom).ln())
            .exp();

        let f1 = jct_pot * (1.0 - ((1.0 - m) * xfc).exp()) / (1.0 - m);
        let dep_cap = fc * jct_pot;
        let vte = model.n * vt;
        let vcrit = vte * (vte / (ROOT_2 * sat_cur)).ln();

        let breakdown = model.bv.map(|bv| {
            let mut cbv = model.ibv;
            if cbv < sat_cur * bv / vt {
                cbv = sat_cur * bv / vt;
                log::warn!("{}: breakdown current increased to {:.3e} to resolve incompatibility with IS", self.name, cbv);
                bv
            } else {
                let tol = DEFAULT_REL_TOL * cbv;
                let mut xbv = bv - vt * (1.0 + cbv / sat_cur).ln();
                for _ in 0..25 {
                    xbv = bv - vt * (cbv / sat_cur + 1.0 - xbv / vt).ln();
                    let xcbv = sat_cur * (((bv - xbv) / vt).exp() - 1.0 + xbv / vt);
                    if (xcbv - cbv).abs() <= tol {
                        break;
                    }
                }
                xbv
            }
        });

        self.temp = DiodeTemperature {
            vt,
            sat_cur,
            jct_cap,
            jct_pot,
            dep_cap,
            vcrit,
            breakdown,
            f1,
            f2: ((1.0 + m) * xfc).exp(),
            f3: 1.0 - fc * (1.0 + m),
            m,
            conductance: if model.rs > 0.0 { 1.0 / model.rs } else { 0.0 },
        };
    }

    fn load(&mut self, context: &mut LoadContext<'_>) {
        let state = &mut *context.state;
        let t = self.temp;
        let csat = t.sat_cur * self.area;
        let gspr = t.conductance * self.area;
        let vte = self.model.n * t.vt;
        let gmin = state.gmin;

        let vd = match state.init {
            InitializationMode::Junction if self.off => 0.0,
            InitializationMode::Junction => t.vcrit,
            InitializationMode::Fix if self.off => 0.0,
            _ => {
                let vd = state.voltage(self.prime, self.neg);
                let (vd, limited) = match t.breakdown {
                    Some(bv) if vd < (-bv + 10.0 * vte).min(0.0) => {
                        let (vdtemp, limited) = pnjlim(-(vd + bv), -(self.vd + bv), vte, t.vcrit);
                        (-(vdtemp + bv), limited)
                    }
                    _ => pnjlim(vd, self.vd, vte, t.vcrit),
                };
                if limited {
                    state.is_convergent = false;
                }
                vd
            }
        };

        let (cd, gd) = if vd >= -3.0 * vte {
            let evd = (vd / vte).exp();
            (csat * (evd - 1.0) + gmin * vd, csat * evd / vte + gmin)
        } else if t.breakdown.map_or(true, |bv| vd >= -bv) {
            let arg = 3.0 * vte / (vd * std::f64::consts::E);
            let arg = arg * arg * arg;
            (-csat * (1.0 + arg) + gmin * vd, csat * 3.0 * arg / vd + gmin)
        } else {
            let bv = t.breakdown.unwrap_or_default();
            let evrev = (-(bv + vd) / vte).exp();
            (-csat * evrev + gmin * vd, csat * evrev / vte + gmin)
        };

        self.vd = vd;
        self.cd = cd;
        self.gd = gd;

        let cdeq = cd - gd * vd;
        context.store.add_rhs(self.rhs_neg, cdeq);
        context.store.add_rhs(self.rhs_prime, -cdeq);
        self.slots.stamp(context.store, gspr, gd);
    }

    fn is_convergent(&mut self, context: &mut ConvergenceContext<'_>) -> bool {
        let state = &mut *context.state;
        let vd = state.voltage(self.prime, self.neg);
        let delvd = vd - self.vd;
        let cdhat = self.cd + self.gd * delvd;
        let tol = context.config.rel_tol * cdhat.abs().max(self.cd.abs()) + context.config.abs_tol;
        if (cdhat - self.cd).abs() > tol {
            state.is_convergent = false;
            return false;
        }
        true
    }
}

impl TransientBehavior for DiodeBehavior {
    fn create_states(&mut self, method: &mut IntegrationMethod) -> Result<()> {
        self.charge = Some(method.create_derivative());
        Ok(())
    }

    fn initialize_states(&mut self, state: &SimulationState, method: &mut IntegrationMethod) {
        let Some(charge) = self.charge else {
            return;
        };
        let vd = state.voltage(self.prime, self.neg);
        let (q, c) = self.charge_and_capacitance(vd);
        self.capacitance = c;
        method.set_value(charge, q);
    }

    fn load(&mut self, context: &mut TransientContext<'_>) {
        let Some(charge) = self.charge else {
            return;
        };
        let vd = self.vd;
        let (q, c) = self.charge_and_capacitance(vd);
        self.capacitance = c;

        let method = &mut *context.method;
        method.set_value(charge, q);
        method.integrate(charge);
        let geq = method.jacobian(c);
        let ceq = method.rhs_current(charge, geq, vd);

        context.store.add_rhs(self.rhs_prime, ceq);
        context.store.add_rhs(self.rhs_neg, -ceq);
        self.slots.stamp(context.store, 0.0, geq);
    }
}

impl FrequencyBehavior for DiodeBehavior {
    fn allocate(&mut self, context: &mut ComplexAllocation<'_>) -> Result<()> {
        self.ac_slots = DiodeSlots::reserve(context.store, self.pos, self.neg, self.prime)?;
        Ok(())
    }

    fn initialize(&mut self, state: &SimulationState) {
        let vd = state.voltage(self.prime, self.neg);
        let (_, c) = self.charge_and_capacitance(vd);
        self.capacitance = c;
    }

    fn load(&mut self, context: &mut FrequencyContext<'_>) {
        let gspr = Complex64::new(self.temp.conductance * self.area, 0.0);
        let y = Complex64::new(self.gd, 0.0) + context.laplace * self.capacitance;
        self.ac_slots.stamp(context.store, gspr, y);
    }
}
