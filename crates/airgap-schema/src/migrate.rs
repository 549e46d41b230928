//! Deprecated-field migrations applied to definitions on load.
//!
//! Each migration has a stable id. The builder records every known id in
//! `build.migrations`, so a definition coming out of a built layout only has
//! its leftover deprecated fields cleared instead of being migrated twice.

use crate::component::{Action, Component, SetVariable};
use crate::package::PackageDefinition;
use tracing::{info, warn};

pub const SCRIPTS_TO_ACTIONS: &str = "scripts-to-actions";
pub const PLURALIZE_SET_VARIABLE: &str = "pluralize-set-variable";

struct Migration {
    id: &'static str,
    /// Rewrites the deprecated field into its replacement; returns a warning when it did.
    migrate: fn(&mut Component) -> Option<String>,
    /// Drops the deprecated field when the migration has already been applied.
    clear: fn(&mut Component),
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        id: SCRIPTS_TO_ACTIONS,
        migrate: scripts_to_actions,
        clear: clear_scripts,
    },
    Migration {
        id: PLURALIZE_SET_VARIABLE,
        migrate: pluralize_set_variable,
        clear: clear_set_variable,
    },
];

/// Ids of every registered migration, in application order.
pub fn known_migrations() -> Vec<String> {
    MIGRATIONS.iter().map(|m| m.id.to_owned()).collect()
}

/// Apply registered migrations to every component, returning user-facing warnings.
pub fn migrate_deprecated(pkg: &mut PackageDefinition) -> Vec<String> {
    let mut warnings = Vec::new();
    for component in &mut pkg.components {
        for migration in MIGRATIONS {
            if pkg.build.migrations.iter().any(|id| id == migration.id) {
                (migration.clear)(component);
            } else if let Some(warning) = (migration.migrate)(component) {
                info!(
                    "applied migration '{}' to component '{}'",
                    migration.id, component.name
                );
                warnings.push(warning);
            }
        }
        if !component.group.is_empty() {
            warnings.push(format!(
                "component '{}' uses the deprecated 'group' field",
                component.name
            ));
        }
    }
    for warning in &warnings {
        warn!("{warning}");
    }
    warnings
}

fn script_action(cmd: &str) -> Action {
    Action {
        cmd: cmd.to_owned(),
        ..Default::default()
    }
}

fn scripts_to_actions(component: &mut Component) -> Option<String> {
    if component.scripts.is_empty() {
        return None;
    }
    let scripts = std::mem::take(&mut component.scripts);

    let deploy = &mut component.actions.on_deploy;
    deploy.defaults.mute = !scripts.show_output;
    if let Some(timeout) = scripts.timeout_seconds {
        deploy.defaults.max_total_seconds = Some(timeout);
    }
    if scripts.retry {
        deploy.defaults.max_retries = Some(u32::MAX);
    }
    deploy
        .before
        .extend(scripts.before.iter().map(|cmd| script_action(cmd)));
    deploy
        .after
        .extend(scripts.after.iter().map(|cmd| script_action(cmd)));

    let create = &mut component.actions.on_create;
    create
        .after
        .extend(scripts.prepare.iter().map(|cmd| script_action(cmd)));

    Some(format!(
        "component '{}' uses deprecated 'scripts'; they were converted to 'actions'",
        component.name
    ))
}

fn clear_scripts(component: &mut Component) {
    component.scripts = Default::default();
}

fn pluralize_set_variable(component: &mut Component) -> Option<String> {
    let mut migrated = false;
    for set in component.actions.sets_mut() {
        for action in set.actions_mut() {
            if action.set_variable.is_empty() {
                continue;
            }
            let name = std::mem::take(&mut action.set_variable);
            action.set_variables.push(SetVariable {
                name,
                ..Default::default()
            });
            migrated = true;
        }
    }
    migrated.then(|| {
        format!(
            "component '{}' uses deprecated 'setVariable'; use 'setVariables' instead",
            component.name
        )
    })
}

fn clear_set_variable(component: &mut Component) {
    for set in component.actions.sets_mut() {
        for action in set.actions_mut() {
            action.set_variable.clear();
        }
    }
}
