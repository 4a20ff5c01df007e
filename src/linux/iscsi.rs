use crate::errors::CurtinError;
use crate::utils::shell;

/// A parsed iscsi disk locator:
/// `iscsi:[user[:pass][:iuser[:ipass]]@]host:proto:port:lun:targetname`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IscsiSpec {
    pub user: Option<String>,
    pub password: Option<String>,
    pub initiator_user: Option<String>,
    pub initiator_password: Option<String>,
    pub host: String,
    pub proto: String,
    pub port: u16,
    pub lun: u32,
    pub target: String,
}

pub fn parse_uri(uri: &str) -> Result<IscsiSpec, CurtinError> {
    let rest = uri.strip_prefix("iscsi:").ok_or_else(|| {
        CurtinError::BadConfig(format!("not an iscsi uri: {uri:?}"))
    })?;

    let bad = |why: &str| CurtinError::BadConfig(format!("bad iscsi uri {uri:?}: {why}"));

    let (auth, address) = match rest.rsplit_once('@') {
        Some((auth, address)) => (Some(auth), address),
        None => (None, rest),
    };

    let (mut user, mut password) = (None, None);
    let (mut initiator_user, mut initiator_password) = (None, None);
    if let Some(auth) = auth {
        let mut fields = auth.split(':');
        user = fields.next().filter(|s| !s.is_empty()).map(String::from);
        password = fields.next().filter(|s| !s.is_empty()).map(String::from);
        initiator_user = fields.next().filter(|s| !s.is_empty()).map(String::from);
        initiator_password = fields.next().filter(|s| !s.is_empty()).map(String::from);
    }

    // host:proto:port:lun:targetname; the target may itself contain ':'
    let mut fields = address.splitn(5, ':');
    let host = fields.next().filter(|s| !s.is_empty()).ok_or_else(|| bad("no host"))?;
    let proto = fields.next().ok_or_else(|| bad("no proto"))?;
    let port: u16 = fields
        .next()
        .ok_or_else(|| bad("no port"))?
        .parse()
        .map_err(|_| bad("bad port"))?;
    let lun: u32 = fields
        .next()
        .ok_or_else(|| bad("no lun"))?
        .parse()
        .map_err(|_| bad("bad lun"))?;
    let target = fields.next().filter(|s| !s.is_empty()).ok_or_else(|| bad("no target"))?;

    Ok(IscsiSpec {
        user,
        password,
        initiator_user,
        initiator_password,
        host: host.to_string(),
        proto: proto.to_string(),
        port,
        lun,
        target: target.to_string(),
    })
}

impl IscsiSpec {
    fn portal(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The by-path link the kernel creates for a logged-in session.
    pub fn by_path_link(&self) -> String {
        format!(
            "/dev/disk/by-path/ip-{}-iscsi-{}-lun-{}",
            self.portal(),
            self.target,
            self.lun
        )
    }

    /// Executes:
    /// ```shell
    /// iscsiadm --mode discovery --type sendtargets --portal {host}:{port}
    /// iscsiadm --mode node --targetname {target} --portal {host}:{port} --login
    /// ```
    /// with CHAP credentials pushed into the node record first when set.
    pub fn connect(&self) -> Result<(), CurtinError> {
        let portal = self.portal();

        shell::exec(
            "iscsiadm",
            &[
                "--mode", "discovery", "--type", "sendtargets", "--portal", &portal,
            ],
        )?;

        let node_args = ["--mode", "node", "--targetname", &self.target, "--portal", &portal];

        if let (Some(user), Some(password)) = (&self.user, &self.password) {
            for (name, value) in [
                ("node.session.auth.authmethod", "CHAP"),
                ("node.session.auth.username", user.as_str()),
                ("node.session.auth.password", password.as_str()),
            ] {
                let mut args = node_args.to_vec();
                args.extend(["--op=update", "--name", name, "--value", value]);
                shell::exec("iscsiadm", &args)?;
            }
        }

        let mut login_args = node_args.to_vec();
        login_args.push("--login");
        shell::exec("iscsiadm", &login_args)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uri() {
        let spec =
            parse_uri("iscsi:10.0.1.9:6:3260:1:iqn.2016-04.com.example:target0")
                .unwrap();

        assert_eq!(spec.host, "10.0.1.9");
        assert_eq!(spec.port, 3260);
        assert_eq!(spec.lun, 1);
        assert_eq!(spec.target, "iqn.2016-04.com.example:target0");
        assert!(spec.user.is_none());

        assert_eq!(
            spec.by_path_link(),
            "/dev/disk/by-path/ip-10.0.1.9:3260-iscsi-iqn.2016-04.com.example:target0-lun-1"
        );
    }

    #[test]
    fn test_parse_uri_with_auth() {
        let spec = parse_uri(
            "iscsi:user:secret@192.168.1.12:6:3260:0:iqn.2016-04.com.example:t1",
        )
        .unwrap();

        assert_eq!(spec.user.as_deref(), Some("user"));
        assert_eq!(spec.password.as_deref(), Some("secret"));
        assert_eq!(spec.host, "192.168.1.12");
    }

    #[test]
    fn test_parse_uri_invalid() {
        parse_uri("nfs:server:/export").expect_err("not iscsi");
        parse_uri("iscsi:host:6:notaport:1:iqn.x").expect_err("bad port");
    }
}
