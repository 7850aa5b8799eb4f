//! Field injection into test instances.
//!
//! Test instances describe their injectable fields through [`Injectable`];
//! an [`Injector`] fills them from the values it knows about. The driver
//! side uses this for plain and CDI-style systems; containers use the same
//! machinery to hand container-side services to tests.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::container::{ContainerError, ContainerResult};

/// A shareable value that can be injected.
pub type Service = Arc<dyn Any + Send + Sync>;

/// Modifiers of an injectable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldModifier {
    /// A plain instance field; assignable.
    Instance,
    /// A static field; never assignable by injection.
    Static,
    /// A final field; never assignable by injection.
    Final,
}

/// One field that asks to be injected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    /// Key of the service to inject.
    pub service: String,
    pub modifier: FieldModifier,
}

impl FieldDescriptor {
    /// An assignable field bound to `service`.
    pub fn new(name: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service: service.into(),
            modifier: FieldModifier::Instance,
        }
    }

    /// Sets the field's modifier.
    pub fn with_modifier(mut self, modifier: FieldModifier) -> Self {
        self.modifier = modifier;
        self
    }
}

/// A test instance with injectable fields.
pub trait Injectable: Send {
    /// Fields that ask for injection.
    fn injection_points(&self) -> Vec<FieldDescriptor>;

    /// Assigns `value` to the field called `name`.
    fn set_field(&mut self, name: &str, value: Service) -> ContainerResult<()>;
}

/// Performs dependency injection on test instances.
pub trait Injector: Send + Sync {
    /// Injects every injection point of `instance`.
    ///
    /// # Errors
    ///
    /// - `ContainerError::Injection` - a field is static or final, or no
    ///   value is known for it
    fn inject_fields(&self, instance: &mut dyn Injectable) -> ContainerResult<()>;
}

/// Injector backed by a map of named services.
#[derive(Clone, Default)]
pub struct ServiceInjector {
    services: HashMap<String, Service>,
}

impl ServiceInjector {
    /// Creates an injector without services.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service, builder style.
    pub fn with_service<T: Any + Send + Sync>(mut self, key: impl Into<String>, value: T) -> Self {
        self.register(key, value);
        self
    }

    /// Registers a service.
    pub fn register<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.services.insert(key.into(), Arc::new(value));
    }

    /// Looks up a service by key and type.
    pub fn service<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.services
            .get(key)
            .and_then(|s| Arc::clone(s).downcast::<T>().ok())
    }
}

impl Injector for ServiceInjector {
    fn inject_fields(&self, instance: &mut dyn Injectable) -> ContainerResult<()> {
        for field in instance.injection_points() {
            match field.modifier {
                FieldModifier::Static => {
                    return Err(ContainerError::Injection(format!(
                        "cannot inject static field {}",
                        field.name
                    )));
                }
                FieldModifier::Final => {
                    return Err(ContainerError::Injection(format!(
                        "cannot inject final field {}",
                        field.name
                    )));
                }
                FieldModifier::Instance => {}
            }

            let value = self.services.get(&field.service).ok_or_else(|| {
                ContainerError::Injection(format!(
                    "no service {} for field {}",
                    field.service, field.name
                ))
            })?;
            instance.set_field(&field.name, Arc::clone(value))?;
        }
        Ok(())
    }
}
