//! Resource Tracker
//!
//! Command line front end for the resource flow accounting engine.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use resource_tracker::{NodeKey, Tracker, threshold};

#[derive(Parser)]
#[command(name = "resource-tracker")]
#[command(about = "Track produced and consumed resource attributes across linked groups")]
struct Cli {
    /// Path to the SQLite database
    #[arg(short, long, default_value = "resource_tracker.db")]
    database: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize empty database with schema
    Init,

    /// Create a resource group
    AddGroup { name: String },

    /// Delete an empty, unreferenced resource group
    DeleteGroup { name: String },

    /// List resource groups and their resources
    ListGroups,

    /// Register an attribute name
    DefineAttribute {
        name: String,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Delete an attribute no transformer uses
    DeleteAttribute { name: String },

    /// List attribute definitions
    ListAttributes,

    /// Add a resource to a group
    AddResource { group: String, name: String },

    /// Delete a resource whose values are all zero
    DeleteResource { group: String, name: String },

    /// Set an attribute value on a resource
    Set {
        group: String,
        resource: String,
        attribute: String,
        value: u64,
    },

    /// Make a group produce an attribute, optionally consuming from another group
    Link {
        group: String,
        attribute: String,

        /// Group to consume from
        #[arg(long)]
        from_group: Option<String>,

        /// Attribute to consume from (defaults to the same attribute)
        #[arg(long)]
        from_attribute: Option<String>,

        /// Divisor applied to produced units before they count against the parent
        #[arg(short, long)]
        factor: Option<f64>,
    },

    /// Change what a transformer consumes from; without --from-group it becomes a root
    Relink {
        group: String,
        attribute: String,

        #[arg(long)]
        from_group: Option<String>,

        #[arg(long)]
        from_attribute: Option<String>,
    },

    /// Change a transformer's factor
    Factor {
        group: String,
        attribute: String,
        factor: f64,
    },

    /// Set the yellow and red percent-consumed thresholds
    Thresholds {
        group: String,
        attribute: String,
        yellow: i64,
        red: i64,
    },

    /// Delete a transformer and its attribute values
    Unlink { group: String, attribute: String },

    /// Show produced, consumed and available totals for every transformer
    Status,

    /// Recompute every cached total
    Refresh,

    /// Load sample data for testing
    LoadSample,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut tracker = Tracker::open(&cli.database)?;

    match cli.command {
        Commands::Init => {
            println!("Database initialized at: {}", cli.database.display());
        }

        Commands::AddGroup { name } => {
            let group = tracker.create_group(&name)?;
            println!("Created group '{}' (id {})", group.name, group.id);
        }

        Commands::DeleteGroup { name } => {
            let group = tracker.group_by_name(&name)?;
            tracker.delete_group(group.id)?;
            println!("Deleted group '{}'", name);
        }

        Commands::ListGroups => {
            let groups = tracker.groups()?;
            if groups.is_empty() {
                println!("No resource groups. Run 'add-group' or 'load-sample' first.");
            }
            for group in groups {
                println!("{}", group.name);
                for resource in tracker.resources(group.id)? {
                    let values: Vec<String> = tracker
                        .resource_attributes(resource.id)?
                        .iter()
                        .map(|a| format!("{}: {}", a.attribute_name, a.value))
                        .collect();
                    println!("  {} [{}]", resource.name, values.join(", "));
                }
            }
        }

        Commands::DefineAttribute { name, description } => {
            let attribute = tracker.define_attribute(&name, description.as_deref())?;
            println!("Attribute '{}' (id {})", attribute.name, attribute.id);
        }

        Commands::DeleteAttribute { name } => {
            let attribute = tracker.attribute_by_name(&name)?;
            tracker.delete_attribute(attribute.id)?;
            println!("Deleted attribute '{}'", name);
        }

        Commands::ListAttributes => {
            for attribute in tracker.attributes()? {
                match attribute.description {
                    Some(description) => println!("  {} - {}", attribute.name, description),
                    None => println!("  {}", attribute.name),
                }
            }
        }

        Commands::AddResource { group, name } => {
            let group = tracker.group_by_name(&group)?;
            let resource = tracker.create_resource(group.id, &name)?;
            println!("Created resource '{}' in '{}'", resource.name, group.name);
        }

        Commands::DeleteResource { group, name } => {
            let group = tracker.group_by_name(&group)?;
            let resource = tracker.resource_by_name(group.id, &name)?;
            tracker.delete_resource(resource.id)?;
            println!("Deleted resource '{}'", name);
        }

        Commands::Set {
            group,
            resource,
            attribute,
            value,
        } => {
            let group = tracker.group_by_name(&group)?;
            let resource = tracker.resource_by_name(group.id, &resource)?;
            let changed = tracker.set_attribute(resource.id, &attribute, value)?;
            println!(
                "{}.{} = {} ({} transformer(s) updated)",
                resource.name,
                attribute,
                value,
                changed.len()
            );
        }

        Commands::Link {
            group,
            attribute,
            from_group,
            from_attribute,
            factor,
        } => {
            let key = tracker.key_for(&group, &attribute)?;
            let parent = parent_key(&tracker, &attribute, from_group, from_attribute)?;
            let t = tracker.create_edge(key, parent, factor)?;
            println!("Linked {} (transformer {})", tracker.label(t.key)?, t.id);
        }

        Commands::Relink {
            group,
            attribute,
            from_group,
            from_attribute,
        } => {
            let id = transformer_id(&tracker, &group, &attribute)?;
            let parent = parent_key(&tracker, &attribute, from_group, from_attribute)?;
            tracker.relink(id, parent)?;
            match parent {
                Some(key) => println!("{}/{} now consumes from {}", group, attribute, tracker.label(key)?),
                None => println!("{}/{} is now a root producer", group, attribute),
            }
        }

        Commands::Factor {
            group,
            attribute,
            factor,
        } => {
            let id = transformer_id(&tracker, &group, &attribute)?;
            tracker.set_factor(id, factor)?;
            println!("{}/{} factor = {}", group, attribute, factor);
        }

        Commands::Thresholds {
            group,
            attribute,
            yellow,
            red,
        } => {
            let id = transformer_id(&tracker, &group, &attribute)?;
            tracker.set_thresholds(id, yellow, red)?;
            println!("{}/{} thresholds: yellow {}%, red {}%", group, attribute, yellow, red);
        }

        Commands::Unlink { group, attribute } => {
            let id = transformer_id(&tracker, &group, &attribute)?;
            tracker.delete_transformer(id)?;
            println!("Removed {}/{}", group, attribute);
        }

        Commands::Status => print_status(&tracker)?,

        Commands::Refresh => {
            let changed = tracker.refresh()?;
            println!("Refreshed totals ({} transformer(s) changed)", changed.len());
        }

        Commands::LoadSample => {
            load_sample_data(&mut tracker)?;
            println!("Sample data loaded successfully!");
        }
    }

    Ok(())
}

fn parent_key(
    tracker: &Tracker,
    attribute: &str,
    from_group: Option<String>,
    from_attribute: Option<String>,
) -> Result<Option<NodeKey>> {
    match (from_group, from_attribute) {
        (Some(group), attr) => {
            let attr = attr.unwrap_or_else(|| attribute.to_string());
            Ok(Some(tracker.key_for(&group, &attr)?))
        }
        (None, Some(_)) => bail!("--from-attribute requires --from-group"),
        (None, None) => Ok(None),
    }
}

fn transformer_id(tracker: &Tracker, group: &str, attribute: &str) -> Result<i64> {
    let key = tracker.key_for(group, attribute)?;
    match tracker.find(key) {
        Some(t) => Ok(t.id),
        None => bail!("No transformer for {}/{}", group, attribute),
    }
}

fn print_status(tracker: &Tracker) -> Result<()> {
    let transformers: Vec<_> = tracker.transformers().collect();
    if transformers.is_empty() {
        println!("No transformers in database. Run 'link' or 'load-sample' first.");
        return Ok(());
    }

    println!(
        "{:<20} {:<20} {:>7} {:>10} {:>10} {:>10} {:>6} {:>6} {:>8}",
        "Transformer", "Consumes from", "Factor", "Produced", "Consumed", "Available", "Used", "Free", "Status"
    );
    println!("{}", "-".repeat(105));
    for t in transformers {
        let parent = match t.consume_from {
            Some(key) => tracker.label(key)?,
            None => "-".to_string(),
        };
        let factor = t.factor.map(|f| f.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<20} {:>7} {:>10} {:>10} {:>10} {:>6} {:>6} {:>8}",
            tracker.label(t.key)?,
            parent,
            factor,
            t.total_produced,
            t.total_consumed,
            threshold::available(t),
            threshold::percent_consumed(t).to_string(),
            threshold::percent_available(t).to_string(),
            threshold::status(t).to_string(),
        );
    }
    Ok(())
}

/// Load a small datacenter: two hypervisors feeding a VM pool
fn load_sample_data(tracker: &mut Tracker) -> Result<()> {
    if !tracker.groups()?.is_empty() {
        bail!("Database already contains groups; load-sample expects an empty database");
    }

    let dc1 = tracker.create_group("DC1")?;
    let vms = tracker.create_group("VMs")?;
    tracker.define_attribute("cpu", Some("Virtual CPU cores"))?;
    tracker.define_attribute("ram", Some("Memory in GB"))?;

    let dc1_cpu = tracker.key_for("DC1", "cpu")?;
    let dc1_ram = tracker.key_for("DC1", "ram")?;
    let vms_cpu = tracker.key_for("VMs", "cpu")?;
    let vms_ram = tracker.key_for("VMs", "ram")?;
    tracker.create_edge(dc1_cpu, None, None)?;
    tracker.create_edge(dc1_ram, None, None)?;
    tracker.create_edge(vms_cpu, Some(dc1_cpu), Some(2.0))?;
    tracker.create_edge(vms_ram, Some(dc1_ram), None)?;

    for (name, cpu, ram) in [("host1", 10, 128), ("host2", 6, 64)] {
        let host = tracker.create_resource(dc1.id, name)?;
        tracker.set_attribute(host.id, "cpu", cpu)?;
        tracker.set_attribute(host.id, "ram", ram)?;
    }
    for (name, cpu, ram) in [("vm1", 4, 16), ("vm2", 4, 32), ("vm3", 2, 8)] {
        let vm = tracker.create_resource(vms.id, name)?;
        tracker.set_attribute(vm.id, "cpu", cpu)?;
        tracker.set_attribute(vm.id, "ram", ram)?;
    }

    println!(
        "Loaded {} sample groups with {} transformers",
        tracker.groups()?.len(),
        tracker.transformers().count()
    );
    Ok(())
}
