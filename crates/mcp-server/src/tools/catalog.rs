use serde_json::{json, Value};

#[derive(Clone, Copy, Debug)]
pub(crate) struct ToolDescriptor {
    pub(crate) name: &'static str,
    pub(crate) summary: &'static str,
    /// Runs on a background task; the read loop keeps serving other requests meanwhile.
    pub(crate) long_running: bool,
}

pub(crate) const TOOL_CATALOG: &[ToolDescriptor] = &[
    ToolDescriptor {
        name: "firmae.help",
        summary: "Show how to use the FirmAE tools, with examples.",
        long_running: false,
    },
    ToolDescriptor {
        name: "firmae.emulate",
        summary: "Run FirmAE emulation for a firmware image; records the outcome and analyses failures.",
        long_running: true,
    },
    ToolDescriptor {
        name: "firmae.clean",
        summary: "Clear everything inside FIRMAE_HOME/scratch/.",
        long_running: false,
    },
    ToolDescriptor {
        name: "firmae.history",
        summary: "Past emulation records from emulation_records.csv, newest first, with filters.",
        long_running: false,
    },
    ToolDescriptor {
        name: "firmae.lookupKB",
        summary: "List the router models known to the lookup knowledge base.",
        long_running: false,
    },
    ToolDescriptor {
        name: "firmae.analyses",
        summary: "Search stored emulation analyses (full text), or list the latest ones.",
        long_running: false,
    },
    ToolDescriptor {
        name: "emux.applyconfig",
        summary: "Append or update a device row in EMUX files/emux/firmware/devices (or devices-extra).",
        long_running: false,
    },
    ToolDescriptor {
        name: "emux.rebuild",
        summary: "Rebuild the EMUX environment (build-emux-volume, then build-emux-docker) in EMUX_HOME.",
        long_running: true,
    },
];

pub(crate) fn is_long_running(name: &str) -> bool {
    TOOL_CATALOG
        .iter()
        .any(|tool| tool.name == name && tool.long_running)
}

fn input_schema(name: &str) -> Value {
    match name {
        "firmae.emulate" => json!({
            "type": "object",
            "properties": {
                "brand": {"type": "string", "description": "Brand name (e.g., DLINK)"},
                "firmware_file": {"type": "string", "description": "Firmware filename (relative to FIRMAE_HOME) or full path"},
                "timeout": {"type": "integer", "description": "Timeout in seconds. Default 1800."}
            },
            "required": ["brand", "firmware_file"]
        }),
        "firmae.history" => json!({
            "type": "object",
            "properties": {
                "brand": {"type": "string", "description": "Filter by brand (e.g., DLINK, TPLINK)"},
                "model": {"type": "string", "description": "Substring match against firmware_name"},
                "success_only": {"type": "boolean", "description": "Show only successful runs"},
                "last_n": {"type": "integer", "description": "Limit to the most recent N rows. Default 20"}
            },
            "required": []
        }),
        "firmae.analyses" => json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Words to search for in analysis summaries and content"},
                "limit": {"type": "integer", "description": "Maximum number of analyses. Default 10"}
            },
            "required": []
        }),
        "emux.applyconfig" => json!({
            "type": "object",
            "properties": {
                "devices_target": {
                    "type": "string",
                    "enum": ["devices", "devices-extra"],
                    "description": "Which devices file to modify. Default 'devices'."
                },
                "row": {"type": "string", "description": "Full CSV row to write. If omitted, provide 'fields'."},
                "fields": {
                    "type": "object",
                    "description": "Structured fields if 'row' is not provided.",
                    "properties": {
                        "ID": {"type": "string"},
                        "qemu-binary": {"type": "string"},
                        "machine-type": {"type": "string"},
                        "cpu-type": {"type": "string"},
                        "dtb": {"type": "string"},
                        "memory": {"type": "string"},
                        "kernel-image": {"type": "string"},
                        "qemuopts": {"type": "string"},
                        "description": {"type": "string"}
                    }
                },
                "allow_update": {"type": "boolean", "description": "Update an existing row with the same ID (default true); otherwise always append."},
                "create_backup": {"type": "boolean", "description": "Create a timestamped .bak before writing (default true)."}
            },
            "required": []
        }),
        "emux.rebuild" => json!({
            "type": "object",
            "properties": {
                "timeout_sec": {"type": "integer", "description": "Max seconds for each step. Default 7200."},
                "no_sudo": {"type": "boolean", "description": "Run without 'sudo -n'. Default false."}
            },
            "required": []
        }),
        _ => json!({"type": "object", "properties": {}, "required": []}),
    }
}

/// `tools/list` result.
pub(crate) fn tools_list() -> Value {
    let tools: Vec<Value> = TOOL_CATALOG
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.summary,
                "inputSchema": input_schema(tool.name),
            })
        })
        .collect();
    json!({ "tools": tools })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_running_set() {
        assert!(is_long_running("firmae.emulate"));
        assert!(is_long_running("emux.rebuild"));
        assert!(!is_long_running("firmae.history"));
        assert!(!is_long_running("nope"));
    }

    #[test]
    fn every_tool_has_an_object_schema() {
        let list = tools_list();
        let tools = list["tools"].as_array().expect("tools array");
        assert_eq!(tools.len(), TOOL_CATALOG.len());
        for tool in tools {
            assert_eq!(tool["inputSchema"]["type"], "object", "{tool}");
        }
        assert_eq!(tools[1]["inputSchema"]["required"], json!(["brand", "firmware_file"]));
    }
}
