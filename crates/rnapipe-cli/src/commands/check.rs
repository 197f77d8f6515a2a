use crate::cli::CheckArgs;
use crate::config::builder;
use crate::error::Result;
use rnapipe::workflows::pipeline::Toolbox;
use tracing::{info, warn};

fn describe(tool: &str) -> (&'static str, &'static str) {
    match tool {
        "infernal" => ("Infernal (cmscan)", "Rfam search + MSA"),
        "rnafold" => ("ViennaRNA (RNAfold)", "Secondary structure"),
        "spotrna" => ("SPOT-RNA", "Pseudoknot detection (optional)"),
        "rhofold" => ("RhoFold+", "Deep-learning 3D prediction"),
        "protenix" => ("Protenix", "AF3-class 3D prediction"),
        "simrna" => ("SimRNA", "Physics-based 3D prediction"),
        "rnadvisor" => ("RNAdvisor", "Model scoring"),
        _ => ("", ""),
    }
}

/// Formats the availability table, one row per collaborator.
pub fn render_table(availability: &[(String, bool)]) -> String {
    let mut out = format!("{:<22} {:<10} {}\n", "Tool", "Status", "Notes");
    out.push_str(&format!("{}\n", "-".repeat(64)));
    for (name, available) in availability {
        let (label, notes) = describe(name);
        let label = if label.is_empty() { name.as_str() } else { label };
        let status = if *available { "OK" } else { "NOT FOUND" };
        out.push_str(&format!("{:<22} {:<10} {}\n", label, status, notes));
    }
    out
}

pub fn run(args: CheckArgs) -> Result<()> {
    let tools = builder::build_tools_config(args.config.as_deref(), &args.set_values)?;
    let toolbox = Toolbox::from_config(&tools);

    info!("Probing external tools...");
    let availability = toolbox.availability();
    for (name, available) in &availability {
        if !available {
            warn!(tool = name.as_str(), "Tool is not available");
        }
    }

    println!("\nrnapipe - Tool Availability\n");
    print!("{}", render_table(&availability));
    println!();
    Ok(())
}
