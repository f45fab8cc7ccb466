//! The built-in defaults source
// (c) 2024 Ross Younger
//!
//! Appended after the user and global sources so the first-write-wins rule
//! turns every entry into a fallback. The resolver recognises the origin
//! path [`crate::tree::DEFAULTS_PATH`] and flips the setter into its
//! defaults phase while these apply, which additionally protects non-empty
//! accumulating lists.

/// Stock client defaults, in ssh_config format.
pub(crate) const DEFAULT_CONFIG: &str = "\
addkeystoagent no
addressfamily any
batchmode no
canonicaldomains none
canonicalizefallbacklocal yes
canonicalizehostname no
canonicalizemaxdots 1
checkhostip no
compression no
connectionattempts 1
controlmaster no
enableescapecommandline no
escapechar ~
exitonforwardfailure no
fingerprinthash sha256
forkafterauthentication no
forwardagent no
forwardx11 no
forwardx11timeout 1200
forwardx11trusted no
gatewayports no
globalknownhostsfile /etc/ssh/ssh_known_hosts /etc/ssh/ssh_known_hosts2
gssapiauthentication no
gssapidelegatecredentials no
hashknownhosts no
hostbasedauthentication no
identitiesonly no
identityfile ~/.ssh/id_rsa
identityfile ~/.ssh/id_ecdsa
identityfile ~/.ssh/id_ed25519
ipqos af21 cs1
kbdinteractiveauthentication yes
loglevel info
nohostauthenticationforlocalhost no
numberofpasswordprompts 3
passwordauthentication yes
permitlocalcommand no
permitremoteopen any
port 22
proxyusefdpass no
pubkeyauthentication yes
requesttty auto
requiredrsasize 1024
serveralivecountmax 3
serveraliveinterval 0
sessiontype default
stdinnull no
streamlocalbindmask 0177
streamlocalbindunlink no
stricthostkeychecking ask
syslogfacility user
tcpkeepalive yes
tunnel no
tunneldevice any:any
updatehostkeys yes
userknownhostsfile ~/.ssh/known_hosts ~/.ssh/known_hosts2
verifyhostkeydns no
visualhostkey no
xauthlocation xauth
";

///////////////////////////////////////////////////////////////////////////////////////
