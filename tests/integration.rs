//! Integration tests for `ldap-deploy`.
//!
//! Zone files live in temp directories; deployment tasks run against a
//! scripted operator and a runner that records commands instead of running
//! them.

use ldap_deploy::command::command_line;
use ldap_deploy::zone::{ZoneText, format_record};
use ldap_deploy::{
    CommandRunner, DeployConfig, DeployError, Deployer, PersonDefaults, Prompter, RecordMode,
    SeedKind, Session, ZoneFile, apply_record_change, bump_serial,
};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

const ZONE: &str = "\
$TTL 86400
@ IN SOA ns1. admin. (
                       12345 ; serial number
                       3600  ; refresh
                       900   ; retry
                       604800 ; expire
                       86400 ) ; minimum
@        IN NS  ns1.
ns1      IN A   192.0.2.1
;[==ldap-deploy aliases==]
";

fn write_zone(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join("example.com.db");
    std::fs::write(&path, contents).unwrap();
    path
}

fn serial_line(text: &str) -> &str {
    text.lines().find(|l| l.contains("; serial")).unwrap()
}

// ---------------------------------------------------------------------------
// Zone editor
// ---------------------------------------------------------------------------

#[test]
fn example_scenario() {
    let input = ZoneText::parse(
        "$TTL 86400\n@ IN SOA ns1. admin. (\n                       12345 ; serial number\n                       ...\n)\n;[==ldap-deploy aliases==]\n",
    );

    let change =
        apply_record_change(input.lines(), "ldap", "host.example.com", RecordMode::Insert)
            .unwrap();
    assert!(change.changed);
    assert_eq!(
        change.lines.last().unwrap(),
        "ldap                                    CNAME   host.example.com"
    );

    let bump = bump_serial(&change.lines).unwrap();
    assert_eq!((bump.previous, bump.current), (12345, 12346));
    assert!(bump.lines[2].contains("12346"));
    assert!(bump.lines[2].ends_with("; serial number"));
}

#[test]
fn idempotent_insert() {
    let dir = tempfile::tempdir().unwrap();
    let zone = ZoneFile::new(write_zone(dir.path(), ZONE));

    let first = zone
        .apply("ldap", "dir01.example.com.", RecordMode::Insert, false)
        .unwrap();
    assert!(first.changed);
    let after_first = std::fs::read(zone.path()).unwrap();

    let second = zone
        .apply("ldap", "dir01.example.com.", RecordMode::Insert, false)
        .unwrap();
    assert!(!second.changed);
    assert!(!second.written);
    assert_eq!(std::fs::read(zone.path()).unwrap(), after_first);
}

#[test]
fn insert_then_remove_restores_content_except_serial() {
    let dir = tempfile::tempdir().unwrap();
    let zone = ZoneFile::new(write_zone(dir.path(), ZONE));

    zone.apply("ldap", "dir01.example.com.", RecordMode::Insert, false)
        .unwrap();
    let removed = zone
        .apply("ldap", "dir01.example.com.", RecordMode::Remove, false)
        .unwrap();
    assert_eq!(removed.serial, Some((12346, 12347)));

    let after = std::fs::read_to_string(zone.path()).unwrap();
    assert_eq!(after, ZONE.replace("12345", "12347"));
}

#[test]
fn lines_before_marker_are_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let zone = ZoneFile::new(write_zone(dir.path(), ZONE));
    let marker = ZONE.find(";[==").unwrap();
    let head_without_serial = |text: &str| -> Vec<String> {
        text[..marker]
            .lines()
            .filter(|l| !l.contains("; serial"))
            .map(str::to_string)
            .collect()
    };
    let expected = head_without_serial(ZONE);

    for mode in [RecordMode::Insert, RecordMode::Remove] {
        zone.apply("ldap", "dir01.example.com.", mode, false).unwrap();
        let text = std::fs::read_to_string(zone.path()).unwrap();
        assert_eq!(head_without_serial(&text), expected);
    }
}

#[test]
fn missing_marker_fails_closed() {
    let dir = tempfile::tempdir().unwrap();
    let contents = ZONE.replace(";[==ldap-deploy aliases==]\n", "");
    let path = write_zone(dir.path(), &contents);
    let before = std::fs::metadata(&path).unwrap().modified().unwrap();

    let err = ZoneFile::new(&path)
        .apply("ldap", "dir01.example.com.", RecordMode::Insert, false)
        .unwrap_err();
    assert!(matches!(err, DeployError::MissingMarker));
    assert!(err.is_zone_format());

    assert_eq!(std::fs::read_to_string(&path).unwrap(), contents);
    assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), before);
}

#[test]
fn noop_leaves_serial_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let zone = ZoneFile::new(write_zone(dir.path(), ZONE));

    let update = zone
        .apply("ldap", "dir01.example.com.", RecordMode::Remove, false)
        .unwrap();
    assert!(!update.changed);
    let text = std::fs::read_to_string(zone.path()).unwrap();
    assert_eq!(serial_line(&text), serial_line(ZONE));
}

#[test]
fn dry_run_never_writes() {
    let dir = tempfile::tempdir().unwrap();
    let zone = ZoneFile::new(write_zone(dir.path(), ZONE));

    let update = zone
        .apply("ldap", "dir01.example.com.", RecordMode::Insert, true)
        .unwrap();
    assert!(update.changed);
    assert!(!update.written);
    assert_ne!(update.text.render(), ZONE);
    assert!(update.text.render().contains("12346 ; serial number"));
    assert_eq!(std::fs::read_to_string(zone.path()).unwrap(), ZONE);
}

#[test]
fn prefix_aliases_are_managed_independently() {
    let dir = tempfile::tempdir().unwrap();
    let zone = ZoneFile::new(write_zone(dir.path(), ZONE));

    zone.apply("ldap-master", "dir01.example.com.", RecordMode::Insert, false)
        .unwrap();
    let update = zone
        .apply("ldap", "dir01.example.com.", RecordMode::Insert, false)
        .unwrap();
    assert!(update.changed);

    zone.apply("ldap", "dir01.example.com.", RecordMode::Remove, false)
        .unwrap();
    let aliases: Vec<String> = zone.records().unwrap().into_iter().map(|r| r.alias).collect();
    assert_eq!(aliases, vec!["ldap-master"]);
}

// ---------------------------------------------------------------------------
// Deployment tasks
// ---------------------------------------------------------------------------

/// Answers questions from a script. For `confirm`, `"y"` means yes; for
/// `prompt`, an empty answer takes the default.
struct Scripted {
    answers: VecDeque<String>,
    asked: Vec<String>,
    notes: Vec<String>,
}

impl Scripted {
    fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|a| (*a).to_string()).collect(),
            asked: Vec::new(),
            notes: Vec::new(),
        }
    }

    fn next(&mut self, question: &str) -> ldap_deploy::Result<String> {
        self.asked.push(question.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| DeployError::PromptClosed {
                question: question.to_string(),
            })
    }
}

impl Prompter for Scripted {
    fn confirm(&mut self, question: &str) -> ldap_deploy::Result<bool> {
        Ok(self.next(question)? == "y")
    }

    fn prompt(&mut self, text: &str, default: Option<&str>) -> ldap_deploy::Result<String> {
        let answer = self.next(text)?;
        if answer.is_empty() {
            return Ok(default.unwrap_or_default().to_string());
        }
        Ok(answer)
    }

    fn notify(&mut self, message: &str) -> ldap_deploy::Result<()> {
        self.notes.push(message.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct Recorder {
    commands: Vec<(String, bool)>,
}

impl CommandRunner for Recorder {
    fn run(&mut self, program: &str, args: &[&str], privileged: bool) -> ldap_deploy::Result<()> {
        self.commands.push((command_line(program, args), privileged));
        Ok(())
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    config: DeployConfig,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let zone = write_zone(dir.path(), ZONE);
        let config = DeployConfig::default()
            .with_domain("example.com")
            .with_hostname("dir01")
            .with_zone_file(zone)
            .with_schema_dir(Path::new(env!("CARGO_MANIFEST_DIR")).join("schemas"))
            .with_preseed_dir(dir.path().join("preseed"))
            .with_log_file(dir.path().join("deploy.log"));
        Self { dir, config }
    }

    fn deployer(&self, answers: &[&str]) -> Deployer<Scripted, Recorder> {
        let session = Session::start(&self.config.log_file, "dir01").unwrap();
        Deployer::new(
            self.config.clone(),
            session,
            Scripted::new(answers),
            Recorder::default(),
        )
    }

    fn log(&self) -> String {
        std::fs::read_to_string(&self.config.log_file).unwrap()
    }

    fn zone(&self) -> String {
        std::fs::read_to_string(self.config.zone_file.as_ref().unwrap()).unwrap()
    }
}

const DN: &str = "dc=dir01,dc=example,dc=com";

#[test]
fn dns_create_inserts_configured_aliases() {
    let fx = Fixture::new();
    // confirm, domain (default), zone path (default)
    let mut d = fx.deployer(&["y", "", ""]);

    let updates = d.dns(RecordMode::Insert).unwrap();
    assert_eq!(updates.len(), 2);
    assert!(updates.iter().all(|u| u.changed && u.written));

    let zone = fx.zone();
    assert!(zone.contains(&format_record("ldap", "dir01.example.com.")));
    assert!(zone.contains(&format_record("ldap-master", "dir01.example.com.")));
    assert!(zone.contains("12347 ; serial number"));
    assert!(fx.log().contains("Inserted CNAME DNS record"));
    drop(d);

    // Second run changes nothing.
    let mut d = fx.deployer(&["y", "", ""]);
    let updates = d.dns(RecordMode::Insert).unwrap();
    assert!(updates.iter().all(|u| !u.changed));
    assert!(fx.zone().contains("12347 ; serial number"));
}

#[test]
fn dns_remove_and_list() {
    let fx = Fixture::new();
    let mut d = fx.deployer(&["y", "", "", "", "y", ""]);

    d.dns(RecordMode::Insert).unwrap();
    assert_eq!(d.list_aliases().unwrap().len(), 2);
    let updates = d.dns(RecordMode::Remove).unwrap();
    assert!(updates.iter().all(|u| u.changed));

    assert_eq!(fx.zone(), ZONE.replace("12345", "12349"));
    let (_, prompter, _) = d.into_parts();
    assert!(prompter.asked.contains(&"Remove Bind DNS Cname Records".to_string()));
}

#[test]
fn dns_declined_does_nothing() {
    let fx = Fixture::new();
    let mut d = fx.deployer(&["n"]);
    assert!(d.dns(RecordMode::Insert).unwrap().is_empty());
    assert_eq!(fx.zone(), ZONE);
}

#[test]
fn dns_dry_run_leaves_zone_alone() {
    let mut fx = Fixture::new();
    fx.config = fx.config.clone().with_dry_run(true);
    let mut d = fx.deployer(&["y", "", ""]);

    let updates = d.dns(RecordMode::Insert).unwrap();
    assert!(updates.iter().all(|u| u.changed && !u.written));
    let serials: Vec<_> = updates.iter().map(|u| u.serial).collect();
    assert_eq!(serials, vec![Some((12345, 12346)), Some((12346, 12347))]);
    assert!(updates[1].text.render().contains(&format_record("ldap", "dir01.example.com.")));
    assert_eq!(fx.zone(), ZONE);
    assert!(fx.log().contains("Would insert CNAME DNS record"));
    assert!(fx.log().contains("(serial 12346 > 12347)"));
}

#[test]
fn dns_missing_marker_surfaces_error() {
    let fx = Fixture::new();
    std::fs::write(fx.config.zone_file.as_ref().unwrap(), "$TTL 1\n1 ; serial\n").unwrap();
    let mut d = fx.deployer(&["y", "", ""]);

    let err = d.dns(RecordMode::Insert).unwrap_err();
    assert!(matches!(err, DeployError::MissingMarker));
    assert_eq!(fx.zone(), "$TTL 1\n1 ; serial\n");
}

#[test]
fn package_tasks_run_privileged_commands() {
    let fx = Fixture::new();
    let mut d = fx.deployer(&["y", "y", "y"]);

    assert!(d.install().unwrap());
    assert!(d.purge().unwrap());
    assert!(d.reset().unwrap());

    let (_, _, runner) = d.into_parts();
    let commands: Vec<&str> = runner.commands.iter().map(|(c, _)| c.as_str()).collect();
    assert_eq!(
        commands,
        vec![
            "apt-get install slapd ldap-utils",
            "service slapd stop",
            "apt-get purge slapd ldap-utils",
            "rm -rf /etc/ldap",
            "rm -rf /var/lib/ldap",
            "dpkg-reconfigure slapd",
        ]
    );
    assert!(runner.commands.iter().all(|(_, privileged)| *privileged));
}

#[test]
fn declined_tasks_run_nothing() {
    let fx = Fixture::new();
    let mut d = fx.deployer(&["n", "n", "n", "n"]);

    assert!(!d.install().unwrap());
    assert!(!d.purge().unwrap());
    assert!(!d.reset().unwrap());
    assert!(!d.default_schema().unwrap());

    let (_, _, runner) = d.into_parts();
    assert!(runner.commands.is_empty());
}

#[test]
fn default_schema_loads_each_bundled_schema() {
    let fx = Fixture::new();
    let mut d = fx.deployer(&["y"]);
    assert!(d.default_schema().unwrap());

    let (_, _, runner) = d.into_parts();
    assert_eq!(runner.commands.len(), 3);
    assert_eq!(
        runner.commands[0].0,
        "ldapadd -Y EXTERNAL -H ldapi:/// -f /etc/ldap/schema/cosine.ldif"
    );
    assert!(runner.commands[2].0.ends_with("inetorgperson.ldif"));
}

#[test]
fn backend_schema_renders_root_password_without_logging_it() {
    let fx = Fixture::new();
    // confirm, domain, root password (generated default)
    let mut d = fx.deployer(&["y", "", ""]);
    assert!(d.backend_schema().unwrap());

    let (session, _, runner) = d.into_parts();
    let rendered_path = session.workspace().join("schemas/backend.ldif");
    let rendered = std::fs::read_to_string(&rendered_path).unwrap();
    assert!(rendered.contains(&format!("olcSuffix: {DN}")));
    assert!(rendered.contains(&format!("olcRootDN: cn=admin,{DN}")));

    let password = session.resolved.root_password.clone().unwrap();
    assert_eq!(password.len(), 16);
    assert!(rendered.contains(&format!("olcRootPW: {password}")));
    assert!(!fx.log().contains(&password));

    assert_eq!(
        runner.commands,
        vec![(
            format!(
                "ldapadd -Y EXTERNAL -H ldapi:/// -f {}",
                rendered_path.display()
            ),
            true
        )]
    );
}

#[test]
fn frontend_schema_binds_as_admin() {
    let fx = Fixture::new();
    // confirm, domain, organisation, description, admin password
    let mut d = fx.deployer(&["y", "", "Acme", "", "adminpw"]);
    assert!(d.frontend_schema().unwrap());

    let (session, _, runner) = d.into_parts();
    let rendered =
        std::fs::read_to_string(session.workspace().join("schemas/frontend.ldif")).unwrap();
    assert!(rendered.contains(&format!("dn: {DN}\n")));
    assert!(rendered.contains("o: Acme\n"));
    assert!(rendered.contains("dc: dir01\n"));
    assert!(rendered.contains("description: Directory for example.com\n"));
    assert!(rendered.contains("userPassword: adminpw\n"));
    assert!(!rendered.contains("${"));

    let (command, privileged) = &runner.commands[0];
    assert!(command.starts_with(&format!("ldapadd -x -D cn=admin,{DN} -W -f ")));
    assert!(!privileged);
}

#[test]
fn preseed_loads_ldif_files_in_order() {
    let fx = Fixture::new();
    let groups = fx.dir.path().join("preseed/groups");
    std::fs::create_dir_all(&groups).unwrap();
    std::fs::write(groups.join("b.ldif"), "dn: cn=b\n").unwrap();
    std::fs::write(groups.join("a.ldif"), "dn: cn=a\n").unwrap();
    std::fs::write(groups.join("notes.txt"), "ignored").unwrap();

    // confirm scan, domain
    let mut d = fx.deployer(&["y", ""]);
    assert_eq!(d.preseed(SeedKind::Groups).unwrap(), 2);

    let (_, _, runner) = d.into_parts();
    assert_eq!(runner.commands.len(), 2);
    assert!(runner.commands[0].0.ends_with("a.ldif"));
    assert!(runner.commands[1].0.ends_with("b.ldif"));
}

#[test]
fn preseed_without_directory_loads_nothing() {
    let fx = Fixture::new();
    let mut d = fx.deployer(&["y"]);
    assert_eq!(d.preseed(SeedKind::Users).unwrap(), 0);
}

#[test]
fn missing_group_preseed_is_logged_and_skipped() {
    let fx = Fixture::new();
    let mut d = fx.deployer(&[]);
    let missing = fx.dir.path().join("nope.ldif");

    assert!(!d.group(Some(&missing)).unwrap());
    assert!(fx.log().contains("Problem, preseed groups ldif doesn't exist."));
    let (_, _, runner) = d.into_parts();
    assert!(runner.commands.is_empty());
}

#[test]
fn inputseed_adds_groups_until_declined() {
    let fx = Fixture::new();
    // confirm, domain, name, gid, dn (default), confirm
    let mut d = fx.deployer(&["y", "", "admins", "5000", "", "n"]);
    assert_eq!(d.inputseed(SeedKind::Groups).unwrap(), 1);

    let (session, _, runner) = d.into_parts();
    let rendered =
        std::fs::read_to_string(session.workspace().join("schemas/groups/admins.ldif")).unwrap();
    assert_eq!(
        rendered,
        format!("dn: cn=admins,ou=groups,{DN}\nobjectClass: posixGroup\ncn: admins\ngidNumber: 5000\n")
    );
    assert_eq!(runner.commands.len(), 1);
}

#[test]
fn group_requires_a_name() {
    let fx = Fixture::new();
    let mut d = fx.deployer(&["", ""]);
    assert!(matches!(
        d.group(None).unwrap_err(),
        DeployError::MissingValue("group name")
    ));
}

#[test]
fn person_uses_defaults_and_renders_ldif() {
    let fx = Fixture::new();
    // domain, then 17 attribute prompts all taking defaults
    let answers = vec![""; 18];
    let mut d = fx.deployer(&answers);
    let defaults = PersonDefaults {
        username: Some("jdoe".to_string()),
        firstname: Some("Jane".to_string()),
        lastname: Some("Doe".to_string()),
        uid: Some("10000".to_string()),
        gid: Some("5000".to_string()),
        password: Some("s3cret".to_string()),
        ..PersonDefaults::default()
    };
    assert!(d.person(&defaults).unwrap());

    let (session, prompter, runner) = d.into_parts();
    assert_eq!(prompter.asked.len(), 18);
    let rendered =
        std::fs::read_to_string(session.workspace().join("schemas/users/jdoe.ldif")).unwrap();
    assert!(rendered.starts_with(&format!("dn: uid=jdoe,ou=people,{DN}\n")));
    assert!(rendered.contains("cn: Jane Doe\n"));
    assert!(rendered.contains("userPassword: s3cret\n"));
    assert!(rendered.contains("mail: jdoe@example.com\n"));
    assert!(!fx.log().contains("s3cret"));
    assert_eq!(runner.commands.len(), 1);
}

#[test]
fn start_with_everything_declined_runs_nothing() {
    let fx = Fixture::new();
    // domain, then dns, install, default, backend, frontend, and the four
    // seed confirmations
    let mut answers = vec![""];
    answers.extend(["n"; 9]);
    let mut d = fx.deployer(&answers);

    d.start().unwrap();

    let (session, prompter, runner) = d.into_parts();
    assert_eq!(session.resolved.dn.as_deref(), Some(DN));
    assert!(prompter.answers.is_empty());
    assert!(runner.commands.is_empty());
    assert_eq!(fx.zone(), ZONE);
    assert!(fx.log().contains("Deployment finished"));
}

#[test]
fn closed_input_aborts_task() {
    let fx = Fixture::new();
    let mut d = fx.deployer(&[]);
    assert!(matches!(
        d.install().unwrap_err(),
        DeployError::PromptClosed { .. }
    ));
}
