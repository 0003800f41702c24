use crate::json::JsonError;
use crate::schema::{ProcedureDefinition, ProcedureKind, SchemaError, ServiceDefinition, TypeDefinition};
use colored::*;
use jeb_core::proto;
use jeb_core::{CallError, ConnectError};
use std::collections::BTreeMap;
use std::fmt::Display;

/// A wrapper struct for a formatted, colored string.
///
/// Implements `Display` so it can be printed directly.
pub struct FormattedString(pub String);

/// A service definition together with its name.
pub struct ServiceOverview<'a>(pub &'a str, pub &'a ServiceDefinition);

pub struct GenericError<T: Display>(pub &'static str, pub T);

impl std::fmt::Display for FormattedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", self.0)?;
        Ok(())
    }
}

impl From<serde_json::Value> for FormattedString {
    fn from(value: serde_json::Value) -> Self {
        FormattedString(serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()))
    }
}

impl From<ConnectError> for FormattedString {
    fn from(err: ConnectError) -> Self {
        FormattedString(format!("{}\n\n'{}'", "Connection Error:".red().bold(), err))
    }
}

impl From<CallError> for FormattedString {
    fn from(err: CallError) -> Self {
        let title = match err {
            CallError::Remote(_) | CallError::Service(_) => "kRPC Error:",
            _ => "Call Failed:",
        };
        FormattedString(format!("{}\n\n'{}'", title.red().bold(), err))
    }
}

impl From<SchemaError> for FormattedString {
    fn from(err: SchemaError) -> Self {
        FormattedString(format!(
            "{}\n\n'{}'",
            "Failed to load service schema:".red().bold(),
            err
        ))
    }
}

impl From<JsonError> for FormattedString {
    fn from(err: JsonError) -> Self {
        FormattedString(format!("{}\n\n'{}'", "Invalid arguments:".red().bold(), err))
    }
}

impl<T: Display> From<GenericError<T>> for FormattedString {
    fn from(GenericError(msg, err): GenericError<T>) -> Self {
        FormattedString(format!("{}:\n\n'{}'", msg.red().bold(), err))
    }
}

impl From<proto::Status> for FormattedString {
    fn from(status: proto::Status) -> Self {
        let rows = [
            ("version", status.version.clone()),
            ("bytes read", status.bytes_read.to_string()),
            ("bytes written", status.bytes_written.to_string()),
            ("bytes read rate", format!("{:.1} B/s", status.bytes_read_rate)),
            ("bytes written rate", format!("{:.1} B/s", status.bytes_written_rate)),
            ("rpcs executed", status.rpcs_executed.to_string()),
            ("rpc rate", format!("{:.1} /s", status.rpc_rate)),
            ("one rpc per update", status.one_rpc_per_update.to_string()),
            ("max time per update", format!("{} ns", status.max_time_per_update)),
            ("adaptive rate control", status.adaptive_rate_control.to_string()),
            ("blocking recv", status.blocking_recv.to_string()),
            ("recv timeout", format!("{} ns", status.recv_timeout)),
            ("time per rpc update", format!("{:.6} s", status.time_per_rpc_update)),
            ("stream rpcs", status.stream_rpcs.to_string()),
            ("stream rpcs executed", status.stream_rpcs_executed.to_string()),
            ("stream rpc rate", format!("{:.1} /s", status.stream_rpc_rate)),
        ];

        let mut out = format!("{}\n", "kRPC Server Status".cyan().bold());
        for (label, value) in rows {
            out.push_str(&format!("  {:<24}{}\n", format!("{label}:"), value.green()));
        }
        FormattedString(out.trim_end().to_string())
    }
}

impl From<ServiceOverview<'_>> for FormattedString {
    fn from(ServiceOverview(name, service): ServiceOverview<'_>) -> Self {
        let mut out = format!("{} {} {{\n", "service".cyan(), name.green());

        let mut classes: BTreeMap<&str, Vec<(&String, &ProcedureDefinition)>> = service
            .classes
            .keys()
            .map(|class| (class.as_str(), Vec::new()))
            .collect();

        for (proc_name, procedure) in &service.procedures {
            let kind = ProcedureKind::classify(proc_name);
            match kind.class().and_then(|class| classes.get_mut(class)) {
                Some(members) => members.push((proc_name, procedure)),
                None => out.push_str(&format!("  {}\n", signature(proc_name, procedure))),
            }
        }

        for (class, members) in classes {
            out.push_str(&format!("\n  {} {} {{\n", "class".cyan(), class.green()));
            for (proc_name, procedure) in members {
                out.push_str(&format!("    {}\n", signature(proc_name, procedure)));
            }
            out.push_str("  }\n");
        }

        for (enum_name, enumeration) in &service.enumerations {
            out.push_str(&format!("\n  {} {} {{\n", "enum".cyan(), enum_name.green()));
            for value in &enumeration.values {
                out.push_str(&format!(
                    "    {} = {};\n",
                    value.name,
                    value.value.to_string().purple()
                ));
            }
            out.push_str("  }\n");
        }

        out.push('}');
        FormattedString(out)
    }
}

fn signature(name: &str, procedure: &ProcedureDefinition) -> String {
    let kind = ProcedureKind::classify(name);

    let params = procedure
        .parameters
        .iter()
        .map(|p| match &p.default_value {
            Some(_) => format!("{}: {} = {}", p.name, type_name(&p.ty).yellow(), "default".italic()),
            None => format!("{}: {}", p.name, type_name(&p.ty).yellow()),
        })
        .collect::<Vec<_>>()
        .join(", ");

    let returns = match &procedure.return_type {
        Some(ty) if procedure.return_is_nullable => {
            format!(" {} {}?", "->".cyan(), type_name(ty).yellow())
        }
        Some(ty) => format!(" {} {}", "->".cyan(), type_name(ty).yellow()),
        None => String::new(),
    };

    let label = kind
        .label()
        .map(|label| format!("{} ", label.cyan()))
        .unwrap_or_default();

    format!("{}{}({}){};", label, kind.member().green(), params, returns)
}

fn type_name(ty: &TypeDefinition) -> String {
    let inner = || {
        ty.types
            .iter()
            .map(type_name)
            .collect::<Vec<_>>()
            .join(", ")
    };

    match (ty.code.as_str(), &ty.service, &ty.name) {
        ("CLASS" | "ENUMERATION", Some(service), Some(name)) => format!("{service}.{name}"),
        ("LIST", ..) => format!("list<{}>", inner()),
        ("SET", ..) => format!("set<{}>", inner()),
        ("DICTIONARY", ..) => format!("dict<{}>", inner()),
        ("TUPLE", ..) => format!("({})", inner()),
        ("SINT32", ..) => "int32".to_string(),
        ("SINT64", ..) => "int64".to_string(),
        (code, ..) => code.to_lowercase(),
    }
}
