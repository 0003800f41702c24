//! # Service Schemas
//!
//! Loads kRPC service-definition files (the JSON documents a kRPC server ships for each
//! service) and turns their type descriptions into [`TypeDescriptor`]s.
//!
//! ```json
//! {
//!   "SpaceCenter": {
//!     "procedures": {
//!       "Vessel_Flight": {
//!         "parameters": [{ "name": "this", "type": { "code": "CLASS", "service": "SpaceCenter", "name": "Vessel" } }],
//!         "return_type": { "code": "CLASS", "service": "SpaceCenter", "name": "Flight" }
//!       }
//!     },
//!     "classes": { "Vessel": {}, "Flight": {} },
//!     "enumerations": {}
//!   }
//! }
//! ```
use jeb_core::TypeDescriptor;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to read schema file: '{0}'")]
    Io(#[from] std::io::Error),
    #[error("Invalid schema document: '{0}'")]
    Json(#[from] serde_json::Error),
    #[error("Service '{0}' is not defined in the schema")]
    ServiceNotFound(String),
    #[error("Procedure '{0}.{1}' is not defined in the schema")]
    ProcedureNotFound(String, String),
    #[error("Type code '{0}' is not supported")]
    UnsupportedType(String),
    #[error("Type '{0}' is missing its {1}")]
    IncompleteType(String, &'static str),
    #[error("Enumeration '{0}.{1}' is not defined in the schema")]
    EnumerationNotFound(String, String),
}

/// All services found in one or more schema documents, by name.
#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct Services(pub BTreeMap<String, ServiceDefinition>);

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ServiceDefinition {
    pub procedures: BTreeMap<String, ProcedureDefinition>,
    pub classes: BTreeMap<String, ClassDefinition>,
    pub enumerations: BTreeMap<String, EnumerationDefinition>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ProcedureDefinition {
    pub parameters: Vec<Parameter>,
    pub return_type: Option<TypeDefinition>,
    pub return_is_nullable: bool,
}

#[derive(Debug, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeDefinition,
    #[serde(default)]
    pub default_value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClassDefinition {}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EnumerationDefinition {
    pub values: Vec<EnumerationValue>,
}

#[derive(Debug, Deserialize)]
pub struct EnumerationValue {
    pub name: String,
    pub value: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TypeDefinition {
    pub code: String,
    pub service: Option<String>,
    pub name: Option<String>,
    pub types: Vec<TypeDefinition>,
}

/// The role of a procedure, derived from its name.
///
/// Class, method and property names only contain letters and digits, so underscores split
/// a procedure name into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureKind {
    Procedure { name: String },
    Getter { property: String },
    Setter { property: String },
    Method { class: String, name: String },
    StaticMethod { class: String, name: String },
    ClassGetter { class: String, property: String },
    ClassSetter { class: String, property: String },
}

impl ProcedureKind {
    pub fn classify(name: &str) -> Self {
        let parts: Vec<&str> = name.split('_').collect();
        match parts.as_slice() {
            ["get", property] => Self::Getter {
                property: property.to_string(),
            },
            ["set", property] => Self::Setter {
                property: property.to_string(),
            },
            [class, "static", method] => Self::StaticMethod {
                class: class.to_string(),
                name: method.to_string(),
            },
            [class, "get", property] => Self::ClassGetter {
                class: class.to_string(),
                property: property.to_string(),
            },
            [class, "set", property] => Self::ClassSetter {
                class: class.to_string(),
                property: property.to_string(),
            },
            [class, method] => Self::Method {
                class: class.to_string(),
                name: method.to_string(),
            },
            _ => Self::Procedure { name: name.to_string() },
        }
    }

    /// The method or property name, without class and accessor prefixes.
    pub fn member(&self) -> &str {
        match self {
            Self::Procedure { name }
            | Self::Method { name, .. }
            | Self::StaticMethod { name, .. } => name,
            Self::Getter { property }
            | Self::Setter { property }
            | Self::ClassGetter { property, .. }
            | Self::ClassSetter { property, .. } => property,
        }
    }

    pub fn label(&self) -> Option<&'static str> {
        match self {
            Self::Getter { .. } | Self::ClassGetter { .. } => Some("get"),
            Self::Setter { .. } | Self::ClassSetter { .. } => Some("set"),
            Self::StaticMethod { .. } => Some("static"),
            Self::Procedure { .. } | Self::Method { .. } => None,
        }
    }

    /// The class this procedure belongs to, if any.
    pub fn class(&self) -> Option<&str> {
        match self {
            Self::Method { class, .. }
            | Self::StaticMethod { class, .. }
            | Self::ClassGetter { class, .. }
            | Self::ClassSetter { class, .. } => Some(class),
            _ => None,
        }
    }
}

impl Services {
    /// Reads and merges every `*.json` file under `path` (or `path` itself if it is a file).
    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let mut services = Services::default();

        if path.is_dir() {
            let mut files: Vec<_> = std::fs::read_dir(path)?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<Result<_, _>>()?;
            files.retain(|file| file.extension().is_some_and(|ext| ext == "json"));
            files.sort();

            for file in files {
                services.merge(Self::parse(&std::fs::read_to_string(file)?)?);
            }
        } else {
            services = Self::parse(&std::fs::read_to_string(path)?)?;
        }

        Ok(services)
    }

    pub fn parse(document: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(document)?)
    }

    fn merge(&mut self, other: Services) {
        self.0.extend(other.0);
    }

    pub fn service(&self, name: &str) -> Result<&ServiceDefinition, SchemaError> {
        self.0
            .get(name)
            .ok_or_else(|| SchemaError::ServiceNotFound(name.to_string()))
    }

    pub fn procedure(
        &self,
        service: &str,
        procedure: &str,
    ) -> Result<&ProcedureDefinition, SchemaError> {
        self.service(service)?
            .procedures
            .get(procedure)
            .ok_or_else(|| SchemaError::ProcedureNotFound(service.to_string(), procedure.to_string()))
    }

    /// Converts a schema type into a descriptor, resolving enumerations to their value
    /// tables. Enumerations may live in another service of the same schema.
    pub fn descriptor(&self, ty: &TypeDefinition) -> Result<TypeDescriptor, SchemaError> {
        let descriptor = match ty.code.as_str() {
            "SINT32" => TypeDescriptor::Sint32,
            "BOOL" => TypeDescriptor::Bool,
            "STRING" => TypeDescriptor::String,
            "FLOAT" => TypeDescriptor::Float32,
            "DOUBLE" => TypeDescriptor::Float64,
            "LIST" => match ty.types.as_slice() {
                [inner] => TypeDescriptor::list(self.descriptor(inner)?),
                _ => return Err(SchemaError::IncompleteType(ty.code.clone(), "element type")),
            },
            "TUPLE" => TypeDescriptor::tuple(
                ty.types
                    .iter()
                    .map(|t| self.descriptor(t))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            "CLASS" => {
                let (service, name) = qualified(ty)?;
                TypeDescriptor::class(service, name)
            }
            "ENUMERATION" => {
                let (service, name) = qualified(ty)?;
                let enumeration = self
                    .0
                    .get(service)
                    .and_then(|s| s.enumerations.get(name))
                    .ok_or_else(|| {
                        SchemaError::EnumerationNotFound(service.to_string(), name.to_string())
                    })?;

                TypeDescriptor::enumeration(
                    service,
                    name,
                    enumeration.values.iter().map(|v| (v.name.clone(), v.value)),
                )
            }
            other => return Err(SchemaError::UnsupportedType(other.to_string())),
        };

        Ok(descriptor)
    }

    /// Parameter and return descriptors of a procedure.
    pub fn signature(
        &self,
        procedure: &ProcedureDefinition,
    ) -> Result<(Vec<TypeDescriptor>, Option<TypeDescriptor>), SchemaError> {
        let parameters = procedure
            .parameters
            .iter()
            .map(|p| self.descriptor(&p.ty))
            .collect::<Result<Vec<_>, _>>()?;
        let returns = procedure
            .return_type
            .as_ref()
            .map(|ty| self.descriptor(ty))
            .transpose()?;

        Ok((parameters, returns))
    }
}

fn qualified(ty: &TypeDefinition) -> Result<(&str, &str), SchemaError> {
    match (&ty.service, &ty.name) {
        (Some(service), Some(name)) => Ok((service, name)),
        _ => Err(SchemaError::IncompleteType(ty.code.clone(), "service and name")),
    }
}
