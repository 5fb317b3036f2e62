//! Script lowering: turns inline scripts into files written by an init
//! container, and rewrites steps to run those files.

use crate::compiler::entrypoint::{bin_mount, ENTRYPOINT_BINARY};
use crate::compiler::names::NameGenerator;
use crate::core::{config::Images, error::CompileError, task::ResolvedTask, task::Step};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use k8s_openapi::api::core::v1::{Container, EnvVar, VolumeMount};
use tracing::debug;

pub const SCRIPTS_VOLUME_NAME: &str = "tekton-internal-scripts";
pub const SCRIPTS_DIR: &str = "/tekton/scripts";
pub const PLACE_SCRIPTS_CONTAINER: &str = "place-scripts";
pub const DEFAULT_SCRIPT_PREAMBLE: &str = "#!/bin/sh\nset -xe\n";
const HEREDOC_DELIMITER: &str = "_EOF_";
const STEP_SCRIPT_PREFIX: &str = "script";
const SIDECAR_SCRIPT_PREFIX: &str = "sidecar-script";

pub fn scripts_mount(read_only: bool) -> VolumeMount {
    VolumeMount {
        name: SCRIPTS_VOLUME_NAME.to_string(),
        mount_path: SCRIPTS_DIR.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

/// Plain container for a step, before any naming or wrapping
pub fn step_container(step: &Step) -> Container {
    Container {
        image: Some(step.image.clone()),
        command: (!step.command.is_empty()).then(|| step.command.clone()),
        args: (!step.args.is_empty()).then(|| step.args.clone()),
        working_dir: step.working_dir.clone(),
        env: (!step.env.is_empty()).then(|| {
            step.env
                .iter()
                .map(|e| EnvVar {
                    name: e.name.clone(),
                    value: Some(e.value.clone()),
                    ..Default::default()
                })
                .collect()
        }),
        ..Default::default()
    }
}

/// Containers of one task after script lowering
#[derive(Debug, Clone)]
pub struct TaskContainers<'a> {
    pub task: &'a ResolvedTask,
    pub steps: Vec<Container>,
    pub sidecars: Vec<Container>,
}

/// Output of script lowering for a whole sequence
#[derive(Debug, Clone)]
pub struct LoweredScripts<'a> {
    /// `place-scripts` init container, present only if any script was placed
    pub init_container: Option<Container>,
    pub tasks: Vec<TaskContainers<'a>>,
    /// Whether the scripts target Windows
    pub windows: bool,
}

/// Whether any step or sidecar in the sequence carries a Windows script
pub fn requires_windows(tasks: &[&ResolvedTask]) -> bool {
    tasks.iter().any(|t| {
        t.spec
            .steps
            .iter()
            .chain(t.spec.sidecars.iter())
            .any(Step::is_windows_script)
    })
}

/// Lower scripts for every task in sequence order. Script file indices run
/// across the whole sequence so file names never collide.
pub fn lower_scripts<'a, N: NameGenerator + ?Sized>(
    images: &Images,
    tasks: &[&'a ResolvedTask],
    names: &N,
) -> Result<LoweredScripts<'a>, CompileError> {
    let windows = requires_windows(tasks);
    let mut placer = ScriptPlacer {
        windows,
        names,
        fragment: String::new(),
        step_index: 0,
        sidecar_index: 0,
    };

    let mut lowered = Vec::with_capacity(tasks.len());
    for &task in tasks {
        let steps = task
            .spec
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| placer.lower(task, i, step, STEP_SCRIPT_PREFIX))
            .collect::<Result<Vec<_>, _>>()?;
        let sidecars = task
            .spec
            .sidecars
            .iter()
            .enumerate()
            .map(|(i, sidecar)| placer.lower(task, i, sidecar, SIDECAR_SCRIPT_PREFIX))
            .collect::<Result<Vec<_>, _>>()?;
        lowered.push(TaskContainers {
            task,
            steps,
            sidecars,
        });
    }

    let init_container = (!placer.fragment.is_empty())
        .then(|| place_scripts_container(images, windows, placer.fragment));
    Ok(LoweredScripts {
        init_container,
        tasks: lowered,
        windows,
    })
}

fn place_scripts_container(images: &Images, windows: bool, fragment: String) -> Container {
    let (image, shell, flag) = if windows {
        (&images.shell_image_win, "pwsh", "-Command")
    } else {
        (&images.shell_image, "sh", "-c")
    };
    Container {
        name: PLACE_SCRIPTS_CONTAINER.to_string(),
        image: Some(image.clone()),
        command: Some(vec![shell.to_string()]),
        args: Some(vec![flag.to_string(), fragment]),
        volume_mounts: Some(vec![scripts_mount(false), bin_mount(false)]),
        ..Default::default()
    }
}

struct ScriptPlacer<'n, N: ?Sized> {
    windows: bool,
    names: &'n N,
    fragment: String,
    step_index: usize,
    sidecar_index: usize,
}

impl<N: NameGenerator + ?Sized> ScriptPlacer<'_, N> {
    fn lower(
        &mut self,
        task: &ResolvedTask,
        index: usize,
        step: &Step,
        prefix: &str,
    ) -> Result<Container, CompileError> {
        let mut container = step_container(step);
        let Some(script) = step.script_body() else {
            return Ok(container);
        };
        if self.windows && !step.is_windows_script() {
            return Err(CompileError::MixedScriptPlatforms {
                task: task.name.clone(),
                step: index,
            });
        }

        let counter = if prefix == SIDECAR_SCRIPT_PREFIX {
            &mut self.sidecar_index
        } else {
            &mut self.step_index
        };
        let file = format!(
            "{}/{}",
            SCRIPTS_DIR,
            self.names
                .restrict_length_with_random_suffix(&format!("{}-{}", prefix, counter))
        );
        *counter += 1;

        if self.windows {
            let lowered = windows_script_components(script, file);
            self.fragment.push_str(&format!(
                "@\"\n{}\n\"@ | Out-File -FilePath {}\n",
                lowered.script, lowered.file
            ));
            let mut args = lowered.args;
            args.extend(step.args.iter().cloned());
            container.command = Some(lowered.command);
            container.args = (!args.is_empty()).then_some(args);
        } else {
            let script = if script.trim_start().starts_with("#!") {
                script.to_string()
            } else {
                format!("{}{}", DEFAULT_SCRIPT_PREAMBLE, script)
            };
            self.fragment.push_str(&posix_placement(&file, &script));
            container.command = Some(vec![file.clone()]);
            container.args = None;
        }
        debug!(task = %task.name, step = index, file = %file_name(&container), "placed script");

        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(scripts_mount(true));
        Ok(container)
    }
}

fn file_name(container: &Container) -> String {
    container
        .command
        .as_ref()
        .and_then(|c| c.first())
        .cloned()
        .unwrap_or_default()
}

/// Shell fragment that writes a base64-encoded script to `file` and decodes it
fn posix_placement(file: &str, script: &str) -> String {
    let encoded = STANDARD.encode(script.as_bytes());
    format!(
        "scriptfile=\"{file}\"\n\
         touch ${{scriptfile}} && chmod +x ${{scriptfile}}\n\
         cat > ${{scriptfile}} << '{delim}'\n\
         {encoded}\n\
         {delim}\n\
         {entrypoint} decode-script \"${{scriptfile}}\"\n",
        file = file,
        delim = HEREDOC_DELIMITER,
        encoded = encoded,
        entrypoint = ENTRYPOINT_BINARY,
    )
}

#[derive(Debug, PartialEq)]
struct WindowsScript {
    command: Vec<String>,
    args: Vec<String>,
    script: String,
    file: String,
}

/// Work out how a `#!win` script is invoked.
///
/// `#!win pwsh -File` runs the interpreter with the file as last argument
/// (`.ps1` appended for powershell); a bare `#!win` turns the rest of the
/// script into a `.cmd` batch file that is run directly.
fn windows_script_components(script: &str, file: String) -> WindowsScript {
    let script = script.trim_start();
    let (shebang, body) = script.split_once('\n').unwrap_or((script, ""));
    let tokens: Vec<&str> = shebang.split(' ').filter(|t| !t.is_empty()).collect();

    match tokens.get(1) {
        Some(interpreter) => {
            let file = if interpreter.starts_with("powershell") {
                format!("{}.ps1", file)
            } else {
                file
            };
            let mut args: Vec<String> = tokens[2..].iter().map(|t| t.to_string()).collect();
            args.push(file.clone());
            WindowsScript {
                command: vec![interpreter.to_string()],
                args,
                script: script.to_string(),
                file,
            }
        }
        None => {
            let file = format!("{}.cmd", file);
            WindowsScript {
                command: vec![file.clone()],
                args: Vec::new(),
                script: body.to_string(),
                file,
            }
        }
    }
}
