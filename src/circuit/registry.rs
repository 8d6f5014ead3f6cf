//! Device factories keyed by kind letter.

use std::collections::HashMap;
use std::sync::Arc;

use super::{DeviceInstance, ModelDef, ModelKind, Netlist};
use crate::devices::{
    Bjt, BjtModel, BjtPolarity, Capacitor, Cccs, Ccvs, Component, CurrentSource, CurrentSwitch,
    Diode, DiodeModel, Inductor, Resistor, SwitchModel, Vccs, Vcvs, VoltageSource,
};
use crate::error::{NodalError, Result};

/// Builds a component from a device line and its model, if any.
pub type DeviceFactory = fn(&DeviceInstance, Option<&ModelDef>) -> Result<Box<dyn Component>>;

/// Maps device kind letters to factories.
///
/// Populated before use and then only read, so one registry can serve
/// several threads.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    factories: HashMap<char, DeviceFactory>,
}

impl DeviceRegistry {
    /// A registry without any device kinds.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in device library.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register('R', build_resistor);
        registry.register('C', build_capacitor);
        registry.register('L', build_inductor);
        registry.register('V', build_voltage_source);
        registry.register('I', build_current_source);
        registry.register('E', build_vcvs);
        registry.register('G', build_vccs);
        registry.register('F', build_cccs);
        registry.register('H', build_ccvs);
        registry.register('D', build_diode);
        registry.register('Q', build_bjt);
        registry.register('W', build_switch);
        registry
    }

    /// Add or replace the factory of a kind.
    pub fn register(&mut self, kind: char, factory: DeviceFactory) {
        self.factories.insert(kind.to_ascii_uppercase(), factory);
    }

    pub fn contains(&self, kind: char) -> bool {
        self.factories.contains_key(&kind.to_ascii_uppercase())
    }

    /// Build the component of one device line.
    pub fn build(&self, device: &DeviceInstance, netlist: &Netlist) -> Result<Box<dyn Component>> {
        let factory = self
            .factories
            .get(&device.kind.to_ascii_uppercase())
            .ok_or_else(|| NodalError::UnknownDeviceKind {
                kind: device.kind,
                name: device.name.clone(),
            })?;
        let model = match &device.model {
            Some(name) => Some(netlist.model(name).ok_or_else(|| NodalError::UndefinedModel {
                model: name.clone(),
                name: device.name.clone(),
            })?),
            None => None,
        };
        factory(device, model)
    }
}

fn required_value(device: &DeviceInstance) -> Result<f64> {
    device
        .value
        .ok_or_else(|| NodalError::invalid_parameter(&device.name, "value", "missing"))
}

fn required_control(device: &DeviceInstance) -> Result<&str> {
    device.control.as_deref().ok_or_else(|| {
        NodalError::invalid_parameter(&device.name, "control", "missing controlling source")
    })
}

fn required_model<'a>(
    device: &DeviceInstance,
    model: Option<&'a ModelDef>,
    kinds: &[ModelKind],
) -> Result<&'a ModelDef> {
    let model = model
        .ok_or_else(|| NodalError::invalid_parameter(&device.name, "model", "missing"))?;
    if !kinds.contains(&model.kind) {
        return Err(NodalError::invalid_parameter(
            &device.name,
            "model",
            format!("'{}' is a {:?} model", model.name, model.kind),
        ));
    }
    Ok(model)
}

fn build_resistor(device: &DeviceInstance, _: Option<&ModelDef>) -> Result<Box<dyn Component>> {
    let resistance = required_value(device)?;
    Ok(Box::new(Resistor::new(&device.name, &device.nodes, resistance)))
}

fn build_capacitor(device: &DeviceInstance, _: Option<&ModelDef>) -> Result<Box<dyn Component>> {
    let mut capacitor = Capacitor::new(&device.name, &device.nodes, required_value(device)?);
    if let Some(ic) = device.param("ic") {
        capacitor = capacitor.with_initial_condition(ic);
    }
    Ok(Box::new(capacitor))
}

fn build_inductor(device: &DeviceInstance, _: Option<&ModelDef>) -> Result<Box<dyn Component>> {
    let mut inductor = Inductor::new(&device.name, &device.nodes, required_value(device)?);
    if let Some(ic) = device.param("ic") {
        inductor = inductor.with_initial_condition(ic);
    }
    Ok(Box::new(inductor))
}

fn build_voltage_source(device: &DeviceInstance, _: Option<&ModelDef>) -> Result<Box<dyn Component>> {
    let mut source = VoltageSource::new(&device.name, &device.nodes, device.value.unwrap_or(0.0));
    if let Some(waveform) = &device.waveform {
        source = source.with_waveform(waveform.clone());
        source.dc = device.value;
    }
    source.ac = device.ac;
    Ok(Box::new(source))
}

fn build_current_source(device: &DeviceInstance, _: Option<&ModelDef>) -> Result<Box<dyn Component>> {
    let mut source = CurrentSource::new(&device.name, &device.nodes, device.value.unwrap_or(0.0));
    if let Some(waveform) = &device.waveform {
        source = source.with_waveform(waveform.clone());
        source.dc = device.value;
    }
    source.ac = device.ac;
    Ok(Box::new(source))
}

fn build_vcvs(device: &DeviceInstance, _: Option<&ModelDef>) -> Result<Box<dyn Component>> {
    Ok(Box::new(Vcvs::new(&device.name, &device.nodes, required_value(device)?)))
}

fn build_vccs(device: &DeviceInstance, _: Option<&ModelDef>) -> Result<Box<dyn Component>> {
    Ok(Box::new(Vccs::new(&device.name, &device.nodes, required_value(device)?)))
}

fn build_cccs(device: &DeviceInstance, _: Option<&ModelDef>) -> Result<Box<dyn Component>> {
    let control = required_control(device)?;
    Ok(Box::new(Cccs::new(&device.name, &device.nodes, control, required_value(device)?)))
}

fn build_ccvs(device: &DeviceInstance, _: Option<&ModelDef>) -> Result<Box<dyn Component>> {
    let control = required_control(device)?;
    Ok(Box::new(Ccvs::new(&device.name, &device.nodes, control, required_value(device)?)))
}

fn build_diode(device: &DeviceInstance, model: Option<&ModelDef>) -> Result<Box<dyn Component>> {
    let def = required_model(device, model, &[ModelKind::Diode])?;
    let mut model = DiodeModel::new(&def.name);
    for (param, &value) in &def.params {
        model.set(param, value)?;
    }
    let mut diode = Diode::new(&device.name, &device.nodes, Arc::new(model));
    if let Some(area) = device.param("area") {
        diode = diode.with_area(area);
    }
    if let Some(off) = device.param("off") {
        diode = diode.with_off(off != 0.0);
    }
    Ok(Box::new(diode))
}

fn build_bjt(device: &DeviceInstance, model: Option<&ModelDef>) -> Result<Box<dyn Component>> {
    let def = required_model(device, model, &[ModelKind::Npn, ModelKind::Pnp])?;
    let polarity = match def.kind {
        ModelKind::Pnp => BjtPolarity::Pnp,
        _ => BjtPolarity::Npn,
    };
    let mut model = BjtModel::new(&def.name, polarity);
    for (param, &value) in &def.params {
        model.set(param, value)?;
    }
    let mut bjt = Bjt::new(&device.name, &device.nodes, Arc::new(model));
    if let Some(area) = device.param("area") {
        bjt = bjt.with_area(area);
    }
    if let Some(off) = device.param("off") {
        bjt = bjt.with_off(off != 0.0);
    }
    if let Some(vbe) = device.param("icvbe") {
        bjt.initial_vbe = vbe;
    }
    if let Some(vce) = device.param("icvce") {
        bjt.initial_vce = vce;
    }
    Ok(Box::new(bjt))
}

fn build_switch(device: &DeviceInstance, model: Option<&ModelDef>) -> Result<Box<dyn Component>> {
    let def = required_model(device, model, &[ModelKind::CurrentSwitch])?;
    let control = required_control(device)?;
    let mut model = SwitchModel::new(&def.name);
    for (param, &value) in &def.params {
        model.set(param, value)?;
    }
    let switch = CurrentSwitch::new(&device.name, &device.nodes, control, Arc::new(model))
        .with_initially_on(device.param("on").is_some_and(|on| on != 0.0));
    Ok(Box::new(switch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_kinds() {
        let registry = DeviceRegistry::standard();
        for kind in "RCLVIEGFHDQW".chars() {
            assert!(registry.contains(kind), "missing {kind}");
        }
        assert!(!registry.contains('J'));
    }

    #[test]
    fn test_unknown_kind() {
        let registry = DeviceRegistry::standard();
        let device = DeviceInstance::new('J', "J1", &["d", "g", "s"]);
        assert!(matches!(
            registry.build(&device, &Netlist::new()),
            Err(NodalError::UnknownDeviceKind { kind: 'J', .. })
        ));
    }

    #[test]
    fn test_undefined_model() {
        let registry = DeviceRegistry::standard();
        let device = DeviceInstance::new('D', "D1", &["a", "0"]).with_model("1N4148");
        assert!(matches!(
            registry.build(&device, &Netlist::new()),
            Err(NodalError::UndefinedModel { .. })
        ));
    }

    #[test]
    fn test_model_kind_mismatch() {
        let registry = DeviceRegistry::standard();
        let mut netlist = Netlist::new();
        netlist.add_model(ModelDef::new("sw", ModelKind::CurrentSwitch));
        let device = DeviceInstance::new('D', "D1", &["a", "0"]).with_model("sw");
        assert!(matches!(
            registry.build(&device, &netlist),
            Err(NodalError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_custom_factory() {
        fn double_resistor(device: &DeviceInstance, _: Option<&ModelDef>) -> Result<Box<dyn Component>> {
            let value = device.value.unwrap_or(1.0) * 2.0;
            Ok(Box::new(Resistor::new(&device.name, &device.nodes, value)))
        }
        let mut registry = DeviceRegistry::empty();
        registry.register('x', double_resistor);
        let device = DeviceInstance::new('X', "X1", &["a", "0"]).with_value(5.0);
        let component = registry.build(&device, &Netlist::new()).unwrap();
        assert_eq!(component.name(), "X1");
    }
}
