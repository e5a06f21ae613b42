//! Table rendering for CLI listings.

use std::fmt::Write;

use corral_common::types::ContainerInfo;
use corral_runtime::network::Network;

/// Renders containers as a `ps` table. A missing pid renders as `-`.
#[must_use]
pub fn container_table(containers: &[ContainerInfo]) -> String {
    let mut out = format!(
        "{:<12} {:<8} {:<10} {:<30} {:<20}\n",
        "NAME", "PID", "STATUS", "COMMAND", "CREATED"
    );
    for c in containers {
        let _ = writeln!(
            out,
            "{:<12} {:<8} {:<10} {:<30} {:<20}",
            c.name.as_str(),
            c.pid.map_or_else(|| "-".to_owned(), |p| p.to_string()),
            c.status.to_string(),
            truncate(&c.command.join(" "), 30),
            c.created_time.format("%Y-%m-%d %H:%M:%S").to_string(),
        );
    }
    out
}

/// Renders networks as a table.
#[must_use]
pub fn network_table(networks: &[Network]) -> String {
    let mut out = format!("{:<16} {:<20} {:<16} {:<8}\n", "NAME", "SUBNET", "GATEWAY", "DRIVER");
    for n in networks {
        let _ = writeln!(
            out,
            "{:<16} {:<20} {:<16} {:<8}",
            n.name,
            n.subnet.to_string(),
            n.gateway.to_string(),
            n.driver
        );
    }
    out
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_owned();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use corral_common::types::ContainerName;

    use super::*;

    #[test]
    fn missing_pid_renders_as_dash() {
        let info = ContainerInfo::new(ContainerName::parse("web").unwrap(), vec!["top".into()]);
        let table = container_table(&[info]);
        let row = table.lines().nth(1).unwrap();
        let columns: Vec<_> = row.split_whitespace().collect();
        assert_eq!(&columns[..4], ["web", "-", "created", "top"]);
    }

    #[test]
    fn running_row_shows_pid() {
        let mut info =
            ContainerInfo::new(ContainerName::parse("db").unwrap(), vec!["sleep".into(), "9".into()]);
        info.mark_running(4242);
        let table = container_table(&[info]);
        assert!(table.starts_with("NAME"));
        assert!(table.lines().nth(1).unwrap().contains("4242"));
        assert!(table.contains("running"));
        assert!(table.contains("sleep 9"));
    }

    #[test]
    fn network_rows_show_subnet_and_gateway() {
        let network = Network {
            name: "mynet".into(),
            driver: "bridge".into(),
            subnet: "10.8.0.0/24".parse().unwrap(),
            gateway: "10.8.0.1".parse().unwrap(),
        };
        let table = network_table(&[network]);
        let row = table.lines().nth(1).unwrap();
        assert_eq!(
            row.split_whitespace().collect::<Vec<_>>(),
            ["mynet", "10.8.0.0/24", "10.8.0.1", "bridge"]
        );
    }

    #[test]
    fn long_commands_are_truncated() {
        assert_eq!(truncate("abcdef", 5), "ab...");
        assert_eq!(truncate("abc", 5), "abc");
    }
}
