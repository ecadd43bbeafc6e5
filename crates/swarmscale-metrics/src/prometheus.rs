//! Prometheus text exposition format.
//!
//! Renders enriched services into the Prometheus text exposition format
//! for scraping by a Prometheus server or compatible agent.

use crate::publisher::ServiceInfo;

/// Render services into Prometheus text format.
///
/// Produces GAUGE metrics with `service_id` and `service` labels. Memory
/// gauges are only emitted for services whose aggregation succeeded.
pub fn render_prometheus(services: &[ServiceInfo]) -> String {
    let mut out = String::new();

    out.push_str("# HELP swarmscale_replicas Desired replica count.\n");
    out.push_str("# TYPE swarmscale_replicas gauge\n");
    for s in services {
        out.push_str(&format!("swarmscale_replicas{{{}}} {}\n", labels(s), s.replicas));
    }

    out.push_str("# HELP swarmscale_memory_used_bytes Memory used across all running tasks.\n");
    out.push_str("# TYPE swarmscale_memory_used_bytes gauge\n");
    for s in services {
        if let Some(mem) = &s.mem_info {
            out.push_str(&format!(
                "swarmscale_memory_used_bytes{{{}}} {}\n",
                labels(s),
                mem.used()
            ));
        }
    }

    out.push_str(
        "# HELP swarmscale_memory_available_bytes Replicas times per-replica limit (0 = unlimited).\n",
    );
    out.push_str("# TYPE swarmscale_memory_available_bytes gauge\n");
    for s in services {
        if let Some(mem) = &s.mem_info {
            out.push_str(&format!(
                "swarmscale_memory_available_bytes{{{}}} {}\n",
                labels(s),
                mem.available()
            ));
        }
    }

    out.push_str("# HELP swarmscale_memory_used_percent Memory utilization in percent.\n");
    out.push_str("# TYPE swarmscale_memory_used_percent gauge\n");
    for s in services {
        if let Some(mem) = &s.mem_info {
            out.push_str(&format!(
                "swarmscale_memory_used_percent{{{}}} {:.2}\n",
                labels(s),
                mem.used_percentage()
            ));
        }
    }

    out.push_str("# HELP swarmscale_high_mem_threshold_percent Scale-up threshold in percent.\n");
    out.push_str("# TYPE swarmscale_high_mem_threshold_percent gauge\n");
    for s in services {
        out.push_str(&format!(
            "swarmscale_high_mem_threshold_percent{{{}}} {}\n",
            labels(s),
            s.high_mem_threshold
        ));
    }

    out.push_str("# HELP swarmscale_low_mem_threshold_percent Low threshold in percent.\n");
    out.push_str("# TYPE swarmscale_low_mem_threshold_percent gauge\n");
    for s in services {
        out.push_str(&format!(
            "swarmscale_low_mem_threshold_percent{{{}}} {}\n",
            labels(s),
            s.low_mem_threshold
        ));
    }

    out
}

fn labels(s: &ServiceInfo) -> String {
    format!(
        "service_id=\"{}\",service=\"{}\"",
        escape_label(&s.id),
        escape_label(&s.name)
    )
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
