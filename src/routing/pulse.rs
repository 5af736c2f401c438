//! PulseAudio / PipeWire-pulse routing backend driven through `pactl`.
//!
//! Device ids are module indices:
//! - multi-output: `module-combine-sink` named `meetrec_multi`, slaves = original output + loopback
//! - aggregate: `module-null-sink` named `meetrec_aggregate`, fed by two `module-loopback`
//!   modules (microphone and loopback monitor). Its monitor is what gets recorded.

use async_trait::async_trait;
use std::io;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{DeviceId, DeviceRouter, RoutingDevices, RoutingSource};
use crate::config::RoutingConfig;
use crate::error::{SessionError, SessionResult};

pub const MULTI_OUTPUT_SINK: &str = "meetrec_multi";
pub const AGGREGATE_SINK: &str = "meetrec_aggregate";
const LOOPBACK_LATENCY_MSEC: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SinkEntry {
    index: u32,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ModuleEntry {
    id: DeviceId,
    name: String,
    args: String,
}

impl ModuleEntry {
    fn arg(&self, key: &str) -> Option<&str> {
        module_arg(&self.args, key)
    }

    fn owns_sink(&self, sink: &str) -> bool {
        matches!(self.name.as_str(), "module-null-sink" | "module-combine-sink")
            && self.arg("sink_name") == Some(sink)
    }

    fn feeds_sink(&self, sink: &str) -> bool {
        self.name == "module-loopback" && self.arg("sink") == Some(sink)
    }
}

pub struct PulseRouter {
    pactl: String,
    loopback_sink: String,
    microphone: Option<String>,
}

impl PulseRouter {
    pub fn new(config: &RoutingConfig) -> Self {
        let microphone = Some(config.microphone.trim().to_string()).filter(|m| !m.is_empty());
        Self {
            pactl: "pactl".to_string(),
            loopback_sink: config.loopback_sink.clone(),
            microphone,
        }
    }

    pub fn loopback_sink(&self) -> &str {
        &self.loopback_sink
    }

    #[cfg(test)]
    fn with_pactl(mut self, program: impl Into<String>) -> Self {
        self.pactl = program.into();
        self
    }

    async fn run_pactl(&self, args: &[String]) -> SessionResult<String> {
        debug!("pactl {}", args.join(" "));
        let output = Command::new(&self.pactl)
            .args(args)
            .output()
            .await
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => SessionError::PrerequisiteMissing {
                    tool: "pactl".to_string(),
                    remediation: "Install it with your package manager (pulseaudio-utils, \
                                  libpulse or pipewire-pulse)"
                        .to_string(),
                },
                _ => SessionError::device(format!("failed to run pactl: {err}")),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SessionError::device(format!(
                "pactl {} failed ({}): {}",
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn pactl(&self, args: &[&str]) -> SessionResult<String> {
        let owned: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.run_pactl(&owned).await
    }

    async fn load_module(&self, module: &str, args: Vec<String>) -> SessionResult<DeviceId> {
        let mut full = vec!["load-module".to_string(), module.to_string()];
        full.extend(args);
        let stdout = self.run_pactl(&full).await?;
        let id = parse_module_index(&stdout)?;
        debug!("Loaded {} as module {}", module, id);
        Ok(id)
    }

    async fn unload_module(&self, id: DeviceId) -> SessionResult<()> {
        self.pactl(&["unload-module", &id.to_string()]).await?;
        debug!("Unloaded module {}", id);
        Ok(())
    }

    async fn list_modules(&self) -> SessionResult<Vec<ModuleEntry>> {
        let stdout = self.pactl(&["list", "short", "modules"]).await?;
        Ok(parse_short_modules(&stdout))
    }

    async fn list_sinks(&self) -> SessionResult<Vec<SinkEntry>> {
        let stdout = self.pactl(&["list", "short", "sinks"]).await?;
        Ok(parse_short_sinks(&stdout))
    }

    async fn microphone(&self) -> SessionResult<String> {
        if let Some(mic) = &self.microphone {
            return Ok(mic.clone());
        }
        let mic = self.pactl(&["get-default-source"]).await?;
        if mic.is_empty() {
            return Err(SessionError::device("could not find a microphone source"));
        }
        Ok(mic)
    }

    /// Loads every module, recording each id in `created` as soon as it exists.
    async fn create_into(
        &self,
        created: &mut Vec<DeviceId>,
        source: &RoutingSource,
        original_output: &str,
        mic: &str,
    ) -> SessionResult<RoutingDevices> {
        let multi_output_id = self
            .load_module(
                "module-combine-sink",
                vec![
                    format!("sink_name={MULTI_OUTPUT_SINK}"),
                    format!("slaves={original_output},{}", source.uid),
                    "sink_properties=device.description=MeetRec-MultiOutput".to_string(),
                ],
            )
            .await
            .map_err(|e| SessionError::device(format!("creating multi-output device: {e}")))?;
        created.push(multi_output_id);

        let aggregate_id = self
            .load_module(
                "module-null-sink",
                vec![
                    format!("sink_name={AGGREGATE_SINK}"),
                    "sink_properties=device.description=MeetRec-Aggregate".to_string(),
                ],
            )
            .await
            .map_err(|e| SessionError::device(format!("creating aggregate device: {e}")))?;
        created.push(aggregate_id);

        let system_capture_name = format!("{}.monitor", source.uid);
        for input in [mic, system_capture_name.as_str()] {
            let loopback = self
                .load_module("module-loopback", loopback_args(input, AGGREGATE_SINK))
                .await
                .map_err(|e| {
                    SessionError::device(format!("feeding {input} into aggregate device: {e}"))
                })?;
            created.push(loopback);
        }

        self.switch_output(MULTI_OUTPUT_SINK).await?;

        Ok(RoutingDevices {
            multi_output_id,
            aggregate_id,
            aggregate_capture_name: format!("{AGGREGATE_SINK}.monitor"),
            system_capture_name,
            original_output_id: original_output.to_string(),
            mic_id: mic.to_string(),
        })
    }

    /// Unload every id, newest first, without consulting the module list.
    async fn unload_each(&self, ids: &[DeviceId]) -> SessionResult<()> {
        let mut errors = Vec::new();
        for id in ids.iter().rev() {
            if let Err(e) = self.unload_module(*id).await {
                errors.push(format!("module {}: {}", id, e));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SessionError::device(errors.join("; ")))
        }
    }

    async fn rollback(&self, created: &[DeviceId]) {
        for id in created.iter().rev() {
            if let Err(e) = self.unload_module(*id).await {
                warn!("Rollback could not remove module {}: {}", id, e);
            }
        }
    }
}

#[async_trait]
impl DeviceRouter for PulseRouter {
    async fn find_routing_source(&self) -> SessionResult<RoutingSource> {
        let sinks = self.list_sinks().await?;
        match sinks.into_iter().find(|s| s.name == self.loopback_sink) {
            Some(sink) => {
                debug!("Found loopback sink {} (#{})", sink.name, sink.index);
                Ok(RoutingSource {
                    uid: sink.name.clone(),
                    name: sink.name,
                })
            }
            None => Err(SessionError::RoutingDeviceMissing {
                device: format!("Loopback sink '{}'", self.loopback_sink),
                remediation: format!(
                    "Create it with: pactl load-module module-null-sink sink_name={} \
                     sink_properties=device.description=MeetRec-Loopback\n\
                     (add the same line to your PulseAudio default.pa or a PipeWire \
                     null-sink config to keep it across reboots)",
                    self.loopback_sink
                ),
            }),
        }
    }

    async fn current_output(&self) -> SessionResult<String> {
        let sink = self.pactl(&["get-default-sink"]).await?;
        if sink.is_empty() {
            return Err(SessionError::device("could not determine the current output device"));
        }
        Ok(sink)
    }

    async fn create_routing_devices(&self, source: &RoutingSource) -> SessionResult<RoutingDevices> {
        match self.destroy_stale_devices().await {
            Ok(0) => {}
            Ok(n) => warn!("Removed {} routing device(s) left by an earlier session", n),
            Err(e) => warn!("Could not check for stale routing devices: {}", e),
        }

        let original_output = self.current_output().await?;
        let mic = self.microphone().await?;

        let mut created = Vec::new();
        match self
            .create_into(&mut created, source, &original_output, &mic)
            .await
        {
            Ok(devices) => {
                info!(
                    "Routing devices ready (multi-output #{}, aggregate #{}), output was {}",
                    devices.multi_output_id, devices.aggregate_id, devices.original_output_id
                );
                Ok(devices)
            }
            Err(e) => {
                self.rollback(&created).await;
                Err(e)
            }
        }
    }

    async fn destroy_routing_devices(&self, ids: &[DeviceId]) -> SessionResult<()> {
        let modules = match self.list_modules().await {
            Ok(modules) => modules,
            Err(e) => {
                warn!("Could not list modules ({}), unloading ids directly", e);
                return self.unload_each(ids).await;
            }
        };
        let mut errors = Vec::new();

        for id in ids.iter().rev() {
            let Some(module) = modules.iter().find(|m| m.id == *id) else {
                debug!("Module {} already gone", id);
                continue;
            };

            // Loopbacks feeding a sink we own go first.
            if let Some(sink) = module.arg("sink_name") {
                for feeder in modules.iter().filter(|m| m.feeds_sink(sink)) {
                    if let Err(e) = self.unload_module(feeder.id).await {
                        errors.push(format!("module {}: {}", feeder.id, e));
                    }
                }
            }

            if let Err(e) = self.unload_module(*id).await {
                errors.push(format!("module {}: {}", id, e));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SessionError::device(errors.join("; ")))
        }
    }

    async fn switch_output(&self, output_id: &str) -> SessionResult<()> {
        self.pactl(&["set-default-sink", output_id])
            .await
            .map_err(|e| SessionError::device(format!("switching output to {output_id}: {e}")))?;
        debug!("Default output is now {}", output_id);
        Ok(())
    }

    async fn destroy_stale_devices(&self) -> SessionResult<usize> {
        let modules = self.list_modules().await?;
        let stale: Vec<DeviceId> = modules
            .iter()
            .filter(|m| m.owns_sink(MULTI_OUTPUT_SINK) || m.owns_sink(AGGREGATE_SINK))
            .map(|m| m.id)
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }
        self.destroy_routing_devices(&stale).await?;
        Ok(stale.len())
    }
}

fn loopback_args(source: &str, sink: &str) -> Vec<String> {
    vec![
        format!("source={source}"),
        format!("sink={sink}"),
        format!("latency_msec={LOOPBACK_LATENCY_MSEC}"),
        "source_dont_move=true".to_string(),
        "sink_dont_move=true".to_string(),
    ]
}

fn parse_module_index(stdout: &str) -> SessionResult<DeviceId> {
    stdout
        .trim()
        .parse::<u32>()
        .map(DeviceId)
        .map_err(|_| SessionError::device(format!("unexpected load-module output '{stdout}'")))
}

/// `pactl list short sinks`: `index\tname\tdriver\tspec\tstate`
fn parse_short_sinks(stdout: &str) -> Vec<SinkEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let index = fields.next()?.trim().parse().ok()?;
            let name = fields.next()?.trim().to_string();
            Some(SinkEntry { index, name })
        })
        .collect()
}

/// `pactl list short modules`: `index\tname\targs` (args may be empty or contain spaces)
fn parse_short_modules(stdout: &str) -> Vec<ModuleEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(3, '\t');
            let id = DeviceId(fields.next()?.trim().parse().ok()?);
            let name = fields.next()?.trim().to_string();
            let args = fields.next().unwrap_or_default().trim().to_string();
            Some(ModuleEntry { id, name, args })
        })
        .collect()
}

fn module_arg<'a>(args: &'a str, key: &str) -> Option<&'a str> {
    args.split_whitespace().find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then_some(v.trim_matches('"'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULES: &str = "6\tmodule-always-sink\t\n\
        22\tmodule-null-sink\tsink_name=meetrec_loopback sink_properties=device.description=MeetRec-Loopback\n\
        31\tmodule-combine-sink\tsink_name=meetrec_multi slaves=alsa_output.pci,meetrec_loopback\n\
        32\tmodule-null-sink\tsink_name=meetrec_aggregate sink_properties=device.description=MeetRec-Aggregate\n\
        33\tmodule-loopback\tsource=alsa_input.pci sink=meetrec_aggregate latency_msec=30\n\
        34\tmodule-loopback\tsource=meetrec_loopback.monitor sink=meetrec_aggregate latency_msec=30\n";

    #[test]
    fn test_parse_short_sinks() {
        let out = "0\talsa_output.pci-0000_00_1f.3.analog-stereo\tPipeWire\ts32le 2ch 48000Hz\tRUNNING\n\
                   57\tmeetrec_loopback\tPipeWire\tfloat32le 2ch 48000Hz\tSUSPENDED\n";
        let sinks = parse_short_sinks(out);
        assert_eq!(sinks.len(), 2);
        assert_eq!(sinks[1].index, 57);
        assert_eq!(sinks[1].name, "meetrec_loopback");
    }

    #[test]
    fn test_parse_short_sinks_skips_garbage() {
        assert!(parse_short_sinks("not a sink line\n\n").is_empty());
    }

    #[test]
    fn test_parse_short_modules() {
        let modules = parse_short_modules(MODULES);
        assert_eq!(modules.len(), 6);
        assert_eq!(modules[0].args, "");
        assert_eq!(modules[2].id, DeviceId(31));
        assert_eq!(modules[2].name, "module-combine-sink");
        assert_eq!(modules[2].arg("slaves"), Some("alsa_output.pci,meetrec_loopback"));
    }

    #[test]
    fn test_module_ownership() {
        let modules = parse_short_modules(MODULES);
        let owners: Vec<u32> = modules
            .iter()
            .filter(|m| m.owns_sink(MULTI_OUTPUT_SINK) || m.owns_sink(AGGREGATE_SINK))
            .map(|m| m.id.0)
            .collect();
        assert_eq!(owners, vec![31, 32]);

        let feeders: Vec<u32> = modules
            .iter()
            .filter(|m| m.feeds_sink(AGGREGATE_SINK))
            .map(|m| m.id.0)
            .collect();
        assert_eq!(feeders, vec![33, 34]);
    }

    #[test]
    fn test_user_loopback_sink_is_never_stale() {
        let modules = parse_short_modules(MODULES);
        let loopback = modules.iter().find(|m| m.id == DeviceId(22)).unwrap();
        assert!(!loopback.owns_sink(MULTI_OUTPUT_SINK));
        assert!(!loopback.owns_sink(AGGREGATE_SINK));
    }

    #[test]
    fn test_parse_module_index() {
        assert_eq!(parse_module_index("536870913\n").unwrap(), DeviceId(536870913));
        assert!(matches!(
            parse_module_index("Failure: Module initialization failed"),
            Err(SessionError::DeviceOperationFailed(_))
        ));
    }

    #[test]
    fn test_module_arg_quoted_value() {
        assert_eq!(module_arg("sink_name=\"x\" rate=48000", "sink_name"), Some("x"));
        assert_eq!(module_arg("sink_name=x", "sink"), None);
    }

    #[test]
    fn test_loopback_args() {
        let args = loopback_args("meetrec_loopback.monitor", AGGREGATE_SINK);
        assert_eq!(args[0], "source=meetrec_loopback.monitor");
        assert_eq!(args[1], "sink=meetrec_aggregate");
    }

    #[test]
    fn test_microphone_override_from_config() {
        let config = RoutingConfig {
            loopback_sink: "bh".to_string(),
            microphone: "  usb-mic ".to_string(),
        };
        let router = PulseRouter::new(&config);
        assert_eq!(router.microphone.as_deref(), Some("usb-mic"));
        assert_eq!(router.loopback_sink(), "bh");

        let router = PulseRouter::new(&RoutingConfig::default());
        assert!(router.microphone.is_none());
    }

    #[cfg(unix)]
    mod with_fake_pactl {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;
        use tempfile::TempDir;

        /// Writes a `pactl` stand-in keeping its module table in `dir/modules`.
        /// `load-module <fail_module>` fails.
        fn fake_pactl(dir: &Path, fail_module: &str) -> String {
            let d = dir.display();
            let script = format!(
                r#"#!/bin/sh
case "$1" in
  get-default-sink) cat {d}/default 2>/dev/null || echo alsa_output.speakers ;;
  get-default-source) echo alsa_input.mic ;;
  set-default-sink) echo "$2" > {d}/default ;;
  list)
    if [ "$3" = modules ]; then cat {d}/modules 2>/dev/null || true
    else printf '1\tmeetrec_loopback\tmodule-null-sink.c\ts16le 2ch 44100Hz\tIDLE\n'; fi ;;
  load-module)
    if [ "$2" = "{fail_module}" ]; then echo "Failure: Module initialization failed" >&2; exit 1; fi
    n=$(cat {d}/next 2>/dev/null || echo 20)
    echo $((n + 1)) > {d}/next
    shift; mod="$1"; shift
    printf '%s\t%s\t%s\n' "$n" "$mod" "$*" >> {d}/modules
    echo "$n" ;;
  unload-module)
    awk -F'\t' -v id="$2" '$1 != id' {d}/modules > {d}/modules.tmp
    mv {d}/modules.tmp {d}/modules ;;
esac
"#
            );
            write_script(dir, &script)
        }

        fn write_script(dir: &Path, script: &str) -> String {
            let path = dir.join("pactl");
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.display().to_string()
        }

        fn router(dir: &TempDir, fail_module: &str) -> PulseRouter {
            PulseRouter::new(&RoutingConfig::default()).with_pactl(fake_pactl(dir.path(), fail_module))
        }

        fn loaded_modules(dir: &TempDir) -> Vec<String> {
            std::fs::read_to_string(dir.path().join("modules"))
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn default_sink(dir: &TempDir) -> String {
            std::fs::read_to_string(dir.path().join("default"))
                .unwrap_or_else(|_| "alsa_output.speakers".to_string())
                .trim()
                .to_string()
        }

        #[tokio::test]
        async fn test_create_then_destroy_leaves_nothing() {
            let dir = tempfile::tempdir().unwrap();
            let router = router(&dir, "none");

            let source = router.find_routing_source().await.unwrap();
            let devices = router.create_routing_devices(&source).await.unwrap();
            assert_eq!(devices.original_output_id, "alsa_output.speakers");
            assert_eq!(devices.mic_id, "alsa_input.mic");
            assert_eq!(devices.aggregate_capture_name, "meetrec_aggregate.monitor");
            assert_eq!(devices.system_capture_name, "meetrec_loopback.monitor");
            assert_eq!(loaded_modules(&dir).len(), 4);
            assert_eq!(default_sink(&dir), MULTI_OUTPUT_SINK);

            router.switch_output(&devices.original_output_id).await.unwrap();
            router
                .destroy_routing_devices(&devices.created_ids())
                .await
                .unwrap();
            assert!(loaded_modules(&dir).is_empty());
            assert_eq!(default_sink(&dir), "alsa_output.speakers");

            // idempotent
            router
                .destroy_routing_devices(&devices.created_ids())
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn test_partial_creation_is_rolled_back() {
            let dir = tempfile::tempdir().unwrap();
            let router = router(&dir, "module-null-sink");

            let source = router.find_routing_source().await.unwrap();
            let err = router.create_routing_devices(&source).await.unwrap_err();
            assert!(matches!(err, SessionError::DeviceOperationFailed(_)));
            assert!(loaded_modules(&dir).is_empty());
            assert_eq!(default_sink(&dir), "alsa_output.speakers");
        }

        #[tokio::test]
        async fn test_failed_loopback_is_rolled_back() {
            let dir = tempfile::tempdir().unwrap();
            let router = router(&dir, "module-loopback");

            let source = router.find_routing_source().await.unwrap();
            assert!(router.create_routing_devices(&source).await.is_err());
            assert!(loaded_modules(&dir).is_empty());
        }

        #[tokio::test]
        async fn test_stale_devices_are_removed() {
            let dir = tempfile::tempdir().unwrap();
            let router = router(&dir, "none");
            let source = router.find_routing_source().await.unwrap();
            router.create_routing_devices(&source).await.unwrap();

            assert_eq!(router.destroy_stale_devices().await.unwrap(), 2);
            assert!(loaded_modules(&dir).is_empty());
            assert_eq!(router.destroy_stale_devices().await.unwrap(), 0);
        }

        #[tokio::test]
        async fn test_destroy_unloads_every_id_when_listing_fails() {
            let dir = tempfile::tempdir().unwrap();
            let d = dir.path().display();
            let pactl = write_script(
                dir.path(),
                &format!(
                    "#!/bin/sh\ncase \"$1\" in\n  list) exit 1 ;;\n  unload-module) echo \"$2\" >> {d}/unloaded ;;\nesac\n"
                ),
            );
            let router = PulseRouter::new(&RoutingConfig::default()).with_pactl(pactl);

            router
                .destroy_routing_devices(&[DeviceId(31), DeviceId(32)])
                .await
                .unwrap();

            let unloaded = std::fs::read_to_string(dir.path().join("unloaded")).unwrap();
            assert_eq!(unloaded.lines().collect::<Vec<_>>(), vec!["32", "31"]);
        }

        #[tokio::test]
        async fn test_missing_loopback_sink() {
            let dir = tempfile::tempdir().unwrap();
            let config = RoutingConfig {
                loopback_sink: "not_there".to_string(),
                ..RoutingConfig::default()
            };
            let router = PulseRouter::new(&config).with_pactl(fake_pactl(dir.path(), "none"));
            let err = router.find_routing_source().await.unwrap_err();
            assert!(matches!(err, SessionError::RoutingDeviceMissing { .. }));
        }
    }
}
