use std::sync::{Arc, Mutex};
use std::thread;

use approx::assert_relative_eq;
use nodal_core::algebra::ConductanceSlots;
use nodal_core::circuit::Circuit;
use nodal_core::devices::{
    AllocationContext, Behavior, BiasingBehavior, Component, ConvergenceContext, Diode,
    DiodeModel, LoadContext, Resistor, TransientBehavior, TransientContext, VoltageSource,
};
use nodal_core::error::Result;
use nodal_core::integration::IntegrationMethod;
use nodal_core::simulation::{
    BiasingConfig, OperatingPoint, SimulationState, TimeConfig, Transient,
};
use nodal_core::NodalError;

/// Which continuation aid unlocks the probe.
#[derive(Debug, Clone, Copy)]
enum Unlock {
    DiagonalGmin,
    SourceFactor,
    Never,
}

/// What the probe saw during a run.
#[derive(Debug, Default)]
struct Record {
    diagonal_gmin: Vec<f64>,
    source_factor: Vec<f64>,
    /// Solution estimate at each load
    solutions: Vec<Vec<f64>>,
}

/// A conductance to ground that refuses to converge until a continuation
/// aid has been applied at least once.
#[derive(Debug)]
struct Probe {
    name: String,
    nodes: Vec<String>,
    unlock: Unlock,
    record: Arc<Mutex<Record>>,
}

impl Probe {
    fn new(node: &str, unlock: Unlock) -> (Self, Arc<Mutex<Record>>) {
        let record = Arc::new(Mutex::new(Record::default()));
        let probe = Self {
            name: "P1".to_string(),
            nodes: vec![node.to_string(), "0".to_string()],
            unlock,
            record: Arc::clone(&record),
        };
        (probe, record)
    }
}

impl Component for Probe {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> &[String] {
        &self.nodes
    }

    fn create_behavior(&self) -> Result<Box<dyn Behavior>> {
        Ok(Box::new(ProbeBehavior {
            name: self.name.clone(),
            pins: (0, 0),
            slots: ConductanceSlots::default(),
            unlock: self.unlock,
            unlocked: false,
            record: Arc::clone(&self.record),
        }))
    }
}

struct ProbeBehavior {
    name: String,
    pins: (usize, usize),
    slots: ConductanceSlots,
    unlock: Unlock,
    unlocked: bool,
    record: Arc<Mutex<Record>>,
}

impl Behavior for ProbeBehavior {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, pins: &[usize]) -> Result<()> {
        if pins.len() != 2 {
            return Err(NodalError::pin_count(&self.name, 2, pins.len()));
        }
        self.pins = (pins[0], pins[1]);
        Ok(())
    }

    fn biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
        Some(self)
    }
}

impl BiasingBehavior for ProbeBehavior {
    fn allocate(&mut self, context: &mut AllocationContext<'_, f64>) -> Result<()> {
        self.slots = ConductanceSlots::reserve(context.store, self.pins.0, self.pins.1)?;
        Ok(())
    }

    fn load(&mut self, context: &mut LoadContext<'_>) {
        let state = &*context.state;
        {
            let mut record = self.record.lock().unwrap();
            record.diagonal_gmin.push(state.diagonal_gmin);
            record.source_factor.push(state.source_factor);
            record.solutions.push(state.solution.clone());
        }
        match self.unlock {
            Unlock::DiagonalGmin if state.diagonal_gmin > 0.0 => self.unlocked = true,
            Unlock::SourceFactor if state.source_factor < 1.0 => self.unlocked = true,
            _ => {}
        }
        self.slots.stamp(context.store, 1e-3);
    }

    fn is_convergent(&mut self, context: &mut ConvergenceContext<'_>) -> bool {
        if !self.unlocked {
            context.state.is_convergent = false;
        }
        self.unlocked
    }
}

fn probed_divider(unlock: Unlock) -> (Circuit, Arc<Mutex<Record>>) {
    let (probe, record) = Probe::new("a", unlock);
    let mut circuit = Circuit::new();
    circuit.add(VoltageSource::new("V1", &["in", "0"], 10.0)).unwrap();
    circuit.add(Resistor::new("R1", &["in", "a"], 1e3)).unwrap();
    circuit.add(probe).unwrap();
    (circuit, record)
}

#[test]
fn test_gmin_stepping_recovers() {
    let (circuit, record) = probed_divider(Unlock::DiagonalGmin);
    let config = BiasingConfig::default().with_dc_max_iterations(20);
    let (solution, stats) = OperatingPoint::new(config).run_with_statistics(&circuit).unwrap();

    assert_relative_eq!(solution.voltage("a").unwrap(), 5.0, max_relative = 1e-9);
    assert_relative_eq!(solution.current("V1").unwrap(), -5e-3, max_relative = 1e-9);
    assert!(stats.iterations > 20);

    let record = record.lock().unwrap();
    let stepped: Vec<f64> = record
        .diagonal_gmin
        .iter()
        .copied()
        .filter(|&g| g > 0.0)
        .collect();
    assert!(!stepped.is_empty());
    assert!(stepped.windows(2).all(|w| w[1] <= w[0]));
    // The final load runs without the diagonal shunt
    assert_eq!(record.diagonal_gmin.last().copied(), Some(0.0));
    assert!(record.source_factor.iter().all(|&f| f == 1.0));

    // Stepping restarts from the guess present before the direct attempt
    let first = record
        .diagonal_gmin
        .iter()
        .position(|&g| g > 0.0)
        .unwrap();
    assert!(record.solutions[first - 1].iter().any(|&v| v != 0.0));
    assert!(record.solutions[first].iter().all(|&v| v == 0.0));
}

#[test]
fn test_source_stepping_recovers() {
    let (circuit, record) = probed_divider(Unlock::SourceFactor);
    let config = BiasingConfig::default()
        .with_dc_max_iterations(20)
        .with_gmin_steps(0)
        .with_source_steps(4);
    let solution = OperatingPoint::new(config).run(&circuit).unwrap();

    assert_relative_eq!(solution.voltage("a").unwrap(), 5.0, max_relative = 1e-9);
    let record = record.lock().unwrap();
    assert!(record.source_factor.iter().any(|&f| f == 0.0));
    assert_eq!(record.source_factor.last().copied(), Some(1.0));

    let first = record
        .source_factor
        .iter()
        .position(|&f| f < 1.0)
        .unwrap();
    assert_eq!(record.source_factor[first], 0.0);
    assert!(record.solutions[first - 1].iter().any(|&v| v != 0.0));
    assert!(record.solutions[first].iter().all(|&v| v == 0.0));
}

#[test]
fn test_no_operating_point() {
    let (circuit, _) = probed_divider(Unlock::Never);
    let config = BiasingConfig::default()
        .with_dc_max_iterations(5)
        .with_gmin_steps(2)
        .with_source_steps(2);
    assert!(matches!(
        OperatingPoint::new(config).run(&circuit),
        Err(NodalError::NoOperatingPoint { .. })
    ));
}

#[test]
fn test_unpowered_circuit_converges_at_once() {
    let mut circuit = Circuit::new();
    circuit.add(VoltageSource::new("V1", &["in", "0"], 0.0)).unwrap();
    circuit.add(Resistor::new("R1", &["in", "out"], 1e3)).unwrap();
    circuit.add(Resistor::new("R2", &["out", "0"], 1e3)).unwrap();

    let (solution, stats) = OperatingPoint::default().run_with_statistics(&circuit).unwrap();
    assert_eq!(stats.iterations, 1);
    assert!(solution.values().iter().all(|&v| v == 0.0));
}

fn diode_clamp() -> Circuit {
    let model = Arc::new(
        DiodeModel::new("D")
            .with("is", 2.52e-9)
            .unwrap()
            .with("n", 1.752)
            .unwrap()
            .with("rs", 0.568)
            .unwrap(),
    );
    let mut circuit = Circuit::new();
    circuit.add(VoltageSource::new("V1", &["in", "0"], 5.0)).unwrap();
    circuit.add(Resistor::new("R1", &["in", "a"], 1e3)).unwrap();
    circuit.add(Diode::new("D1", &["a", "0"], model)).unwrap();
    circuit
}

#[test]
fn test_repeated_runs_are_identical() {
    let circuit = diode_clamp();
    let first = OperatingPoint::default().run(&circuit).unwrap();
    let second = OperatingPoint::default().run(&circuit).unwrap();
    let first: Vec<u64> = first.values().iter().map(|v| v.to_bits()).collect();
    let second: Vec<u64> = second.values().iter().map(|v| v.to_bits()).collect();
    assert_eq!(first, second);
}

#[test]
fn test_shared_circuit_across_threads() {
    let circuit = diode_clamp();
    let reference = OperatingPoint::default().run(&circuit).unwrap();

    let results: Vec<Vec<f64>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    OperatingPoint::default()
                        .run(&circuit)
                        .unwrap()
                        .values()
                        .to_vec()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for values in results {
        assert_eq!(values, reference.values());
    }
}

/// How a [`Faulty`] device misbehaves during a transient analysis.
#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Never converge at the first probed time point
    RefuseFirstProbe,
    /// Stamp a NaN conductance whenever the step exceeds the limit
    SingularAbove(f64),
}

/// A transient load as seen by a [`Faulty`] device.
#[derive(Debug, Clone)]
struct TransientLoad {
    time: f64,
    refusing: bool,
    solution: Vec<f64>,
}

/// A 1 mS conductance to ground that is well behaved in DC only.
#[derive(Debug)]
struct Faulty {
    name: String,
    nodes: Vec<String>,
    fault: Fault,
    loads: Arc<Mutex<Vec<TransientLoad>>>,
}

impl Component for Faulty {
    fn name(&self) -> &str {
        &self.name
    }

    fn nodes(&self) -> &[String] {
        &self.nodes
    }

    fn create_behavior(&self) -> Result<Box<dyn Behavior>> {
        Ok(Box::new(FaultyBehavior {
            name: self.name.clone(),
            pins: (0, 0),
            slots: ConductanceSlots::default(),
            fault: self.fault,
            first_probe: None,
            retried: false,
            refusing: false,
            loads: Arc::clone(&self.loads),
        }))
    }
}

struct FaultyBehavior {
    name: String,
    pins: (usize, usize),
    slots: ConductanceSlots,
    fault: Fault,
    first_probe: Option<f64>,
    retried: bool,
    refusing: bool,
    loads: Arc<Mutex<Vec<TransientLoad>>>,
}

impl Behavior for FaultyBehavior {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self, pins: &[usize]) -> Result<()> {
        if pins.len() != 2 {
            return Err(NodalError::pin_count(&self.name, 2, pins.len()));
        }
        self.pins = (pins[0], pins[1]);
        Ok(())
    }

    fn biasing(&mut self) -> Option<&mut dyn BiasingBehavior> {
        Some(self)
    }

    fn transient(&mut self) -> Option<&mut dyn TransientBehavior> {
        Some(self)
    }
}

impl BiasingBehavior for FaultyBehavior {
    fn allocate(&mut self, context: &mut AllocationContext<'_, f64>) -> Result<()> {
        self.slots = ConductanceSlots::reserve(context.store, self.pins.0, self.pins.1)?;
        Ok(())
    }

    fn load(&mut self, context: &mut LoadContext<'_>) {
        let Some(time) = context.time else {
            self.slots.stamp(context.store, 1e-3);
            return;
        };
        self.refusing = match self.fault {
            Fault::RefuseFirstProbe => {
                let first = *self.first_probe.get_or_insert(time);
                self.retried |= time != first;
                !self.retried
            }
            Fault::SingularAbove(_) => false,
        };
        self.loads.lock().unwrap().push(TransientLoad {
            time,
            refusing: self.refusing,
            solution: context.state.solution.clone(),
        });
        // Pull the node away from the operating point while refusing
        let g = if self.refusing { 2e-3 } else { 1e-3 };
        self.slots.stamp(context.store, g);
    }

    fn is_convergent(&mut self, context: &mut ConvergenceContext<'_>) -> bool {
        if self.refusing {
            context.state.is_convergent = false;
        }
        !self.refusing
    }
}

impl TransientBehavior for FaultyBehavior {
    fn create_states(&mut self, _method: &mut IntegrationMethod) -> Result<()> {
        Ok(())
    }

    fn initialize_states(&mut self, _state: &SimulationState, _method: &mut IntegrationMethod) {}

    fn load(&mut self, context: &mut TransientContext<'_>) {
        if let Fault::SingularAbove(limit) = self.fault {
            if context.method.history().current().delta > limit {
                self.slots.stamp(context.store, f64::NAN);
            }
        }
    }
}

fn faulty_divider(fault: Fault) -> (Circuit, Arc<Mutex<Vec<TransientLoad>>>) {
    let loads = Arc::new(Mutex::new(Vec::new()));
    let mut circuit = Circuit::new();
    circuit.add(VoltageSource::new("V1", &["in", "0"], 10.0)).unwrap();
    circuit.add(Resistor::new("R1", &["in", "a"], 1e3)).unwrap();
    circuit
        .add(Faulty {
            name: "X1".to_string(),
            nodes: vec!["a".to_string(), "0".to_string()],
            fault,
            loads: Arc::clone(&loads),
        })
        .unwrap();
    (circuit, loads)
}

#[test]
fn test_refused_time_point_restarts_from_last_accepted() {
    let (circuit, loads) = faulty_divider(Fault::RefuseFirstProbe);
    let transient = Transient::new(BiasingConfig::default(), TimeConfig::new(1e-5, 1e-4));
    let result = transient.run(&circuit).unwrap();

    assert!(result.statistics.rejected > 0);
    assert!(result.statistics.time_points > result.statistics.accepted - 1);
    assert_relative_eq!(result.points.last().unwrap().time, 1e-4, epsilon = 1e-15);
    for (_, v) in result.voltages("a").unwrap() {
        assert_relative_eq!(v, 5.0, max_relative = 1e-9);
    }

    let initial = result.points[0].solution.values();
    let loads = loads.lock().unwrap();
    let first_probe = loads[0].time;
    assert!(loads[0].refusing);
    // The refused iterations moved away from the accepted solution
    assert!(loads
        .iter()
        .take_while(|load| load.refusing)
        .any(|load| load.solution != initial));

    let retry = loads.iter().find(|load| !load.refusing).unwrap();
    assert!(retry.time < first_probe);
    assert_eq!(retry.solution, initial);
}

#[test]
fn test_singular_time_point_is_retried_with_smaller_step() {
    let limit = 1e-6;
    let (circuit, _) = faulty_divider(Fault::SingularAbove(limit));
    let transient = Transient::new(BiasingConfig::default(), TimeConfig::new(1e-5, 1e-4));
    let result = transient.run(&circuit).unwrap();

    assert!(result.statistics.rejected > 0);
    assert_relative_eq!(result.points.last().unwrap().time, 1e-4, epsilon = 1e-15);
    let trace = result.voltages("a").unwrap();
    for (_, v) in &trace {
        assert_relative_eq!(*v, 5.0, max_relative = 1e-9);
    }
    for pair in trace.windows(2) {
        assert!(pair[1].0 - pair[0].0 <= limit * (1.0 + 1e-9));
    }
}
