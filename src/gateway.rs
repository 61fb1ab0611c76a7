use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use serenity::{
    async_trait,
    http::Http,
    model::{
        channel::{PermissionOverwrite, PermissionOverwriteType},
        id::{ChannelId, GuildId, RoleId, UserId},
        permissions::Permissions,
    },
};
use tracing::info;

use crate::{
    checker::{ChannelGateway, ChannelMessage, RosterMember},
    config::Config,
};

/// Guild member pages are requested at the API maximum.
const MEMBER_PAGE_SIZE: u64 = 1000;

/// Channel visibility resolved from the guild's role permissions and the
/// channel's permission overwrites. Only members who can actually see the
/// report channel belong on the roster; in a role-restricted channel the
/// rest of the guild is not subject to the reporting requirement.
struct ChannelVisibility {
    guild_id: GuildId,
    owner_id: UserId,
    role_permissions: HashMap<RoleId, Permissions>,
    overwrites: Vec<PermissionOverwrite>,
}

impl ChannelVisibility {
    /// Discord's permission resolution reduced to VIEW_CHANNEL: base role
    /// permissions, then the @everyone overwrite, the member's role
    /// overwrites, and finally the member-specific overwrite. The guild
    /// owner and administrators see every channel.
    fn allows(&self, user_id: UserId, member_roles: &[RoleId]) -> bool {
        if user_id == self.owner_id {
            return true;
        }

        let everyone_role = RoleId(self.guild_id.0);
        let mut perms = self
            .role_permissions
            .get(&everyone_role)
            .copied()
            .unwrap_or_else(Permissions::empty);
        for role in member_roles {
            if let Some(p) = self.role_permissions.get(role) {
                perms |= *p;
            }
        }
        if perms.contains(Permissions::ADMINISTRATOR) {
            return true;
        }

        for ow in &self.overwrites {
            if let PermissionOverwriteType::Role(role) = &ow.kind {
                if *role == everyone_role {
                    perms = (perms & !ow.deny) | ow.allow;
                }
            }
        }

        let mut allow = Permissions::empty();
        let mut deny = Permissions::empty();
        for ow in &self.overwrites {
            if let PermissionOverwriteType::Role(role) = &ow.kind {
                if *role != everyone_role && member_roles.contains(role) {
                    allow |= ow.allow;
                    deny |= ow.deny;
                }
            }
        }
        perms = (perms & !deny) | allow;

        for ow in &self.overwrites {
            if let PermissionOverwriteType::Member(member) = &ow.kind {
                if *member == user_id {
                    perms = (perms & !ow.deny) | ow.allow;
                }
            }
        }

        perms.contains(Permissions::VIEW_CHANNEL)
    }
}

/// [`ChannelGateway`] over the serenity HTTP client. Works identically under
/// the persistent gateway client and the bare one-shot client, since every
/// operation here is a plain REST call.
pub struct DiscordGateway {
    http: Arc<Http>,
    channel_id: ChannelId,
    guild_id: GuildId,
    bot_id: UserId,
    visibility: ChannelVisibility,
    config: Arc<Config>,
}

impl DiscordGateway {
    /// Resolves the configured channel, its guild's role table and overwrites
    /// and the bot's own user id. Failures here mean the check cannot
    /// proceed at all.
    pub async fn connect(http: Arc<Http>, config: Arc<Config>) -> Result<Self> {
        let channel = http
            .get_channel(config.channel_id)
            .await
            .with_context(|| format!("cannot access channel {}", config.channel_id))?;
        let channel = channel
            .guild()
            .with_context(|| format!("channel {} is not a guild channel", config.channel_id))?;
        let guild = http
            .get_guild(channel.guild_id.0)
            .await
            .with_context(|| format!("cannot fetch guild {}", channel.guild_id))?;
        let bot_id = http
            .get_current_user()
            .await
            .context("cannot resolve the bot's own user")?
            .id;

        let visibility = ChannelVisibility {
            guild_id: guild.id,
            owner_id: guild.owner_id,
            role_permissions: guild
                .roles
                .iter()
                .map(|(id, role)| (*id, role.permissions))
                .collect(),
            overwrites: channel.permission_overwrites.clone(),
        };

        Ok(Self {
            http,
            channel_id: channel.id,
            guild_id: channel.guild_id,
            bot_id,
            visibility,
            config,
        })
    }

    fn is_tracked(&self, member: &serenity::model::guild::Member) -> bool {
        if member.user.bot || member.user.id == self.bot_id {
            return false;
        }
        if !self.visibility.allows(member.user.id, &member.roles) {
            return false;
        }
        self.config.target_member_ids.is_empty()
            || self.config.target_member_ids.contains(&member.user.id.0)
    }
}

#[async_trait]
impl ChannelGateway for DiscordGateway {
    async fn fetch_roster(&self) -> Result<Vec<RosterMember>> {
        let mut roster = Vec::new();
        let mut after: Option<UserId> = None;

        loop {
            let page = self
                .guild_id
                .members(&self.http, Some(MEMBER_PAGE_SIZE), after)
                .await
                .with_context(|| format!("cannot list members of guild {}", self.guild_id))?;
            let page_len = page.len();
            after = page.last().map(|m| m.user.id);

            roster.extend(page.into_iter().filter(|m| self.is_tracked(m)).map(|m| {
                RosterMember {
                    id: m.user.id.0,
                    display_name: m.display_name().into_owned(),
                }
            }));

            if page_len < MEMBER_PAGE_SIZE as usize {
                break;
            }
        }

        info!("{} tracked members in guild {}", roster.len(), self.guild_id);
        Ok(roster)
    }

    async fn fetch_messages_before(
        &self,
        before: Option<u64>,
        limit: u8,
    ) -> Result<Vec<ChannelMessage>> {
        let messages = self
            .channel_id
            .messages(&self.http, |b| {
                if let Some(id) = before {
                    b.before(id);
                }
                b.limit(limit as u64)
            })
            .await
            .with_context(|| format!("cannot read history of channel {}", self.channel_id))?;

        Ok(messages
            .into_iter()
            .map(|m| ChannelMessage {
                id: m.id.0,
                author_id: m.author.id.0,
                timestamp: *m.timestamp,
            })
            .collect())
    }

    async fn post_channel_message(&self, content: &str) -> Result<()> {
        self.channel_id
            .say(&self.http, content)
            .await
            .with_context(|| format!("cannot post to channel {}", self.channel_id))?;
        Ok(())
    }

    async fn send_direct_message(&self, recipient: u64, content: &str) -> Result<()> {
        let dm = UserId(recipient)
            .create_dm_channel(&self.http)
            .await
            .with_context(|| format!("cannot open a DM channel with {}", recipient))?;
        dm.id
            .say(&self.http, content)
            .await
            .with_context(|| format!("cannot send a DM to {}", recipient))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: u64 = 100;
    const OWNER: u64 = 1;

    fn overwrite(kind: PermissionOverwriteType, allow: Permissions, deny: Permissions) -> PermissionOverwrite {
        PermissionOverwrite { allow, deny, kind }
    }

    /// A guild whose report channel is hidden from @everyone and opened up
    /// to role 10; role 20 is an unrelated role and role 30 is admin.
    fn restricted_channel() -> ChannelVisibility {
        let mut role_permissions = HashMap::new();
        role_permissions.insert(RoleId(GUILD), Permissions::VIEW_CHANNEL);
        role_permissions.insert(RoleId(10), Permissions::empty());
        role_permissions.insert(RoleId(20), Permissions::empty());
        role_permissions.insert(RoleId(30), Permissions::ADMINISTRATOR);

        ChannelVisibility {
            guild_id: GuildId(GUILD),
            owner_id: UserId(OWNER),
            role_permissions,
            overwrites: vec![
                overwrite(
                    PermissionOverwriteType::Role(RoleId(GUILD)),
                    Permissions::empty(),
                    Permissions::VIEW_CHANNEL,
                ),
                overwrite(
                    PermissionOverwriteType::Role(RoleId(10)),
                    Permissions::VIEW_CHANNEL,
                    Permissions::empty(),
                ),
            ],
        }
    }

    #[test]
    fn role_overwrite_grants_access() {
        let vis = restricted_channel();
        assert!(vis.allows(UserId(2), &[RoleId(10)]));
    }

    #[test]
    fn members_outside_the_role_cannot_see_the_channel() {
        let vis = restricted_channel();
        assert!(!vis.allows(UserId(2), &[]));
        assert!(!vis.allows(UserId(2), &[RoleId(20)]));
    }

    #[test]
    fn administrators_bypass_overwrites() {
        let vis = restricted_channel();
        assert!(vis.allows(UserId(2), &[RoleId(30)]));
    }

    #[test]
    fn the_owner_always_sees_the_channel() {
        let vis = restricted_channel();
        assert!(vis.allows(UserId(OWNER), &[]));
    }

    #[test]
    fn member_overwrite_beats_role_grant() {
        let mut vis = restricted_channel();
        vis.overwrites.push(overwrite(
            PermissionOverwriteType::Member(UserId(2)),
            Permissions::empty(),
            Permissions::VIEW_CHANNEL,
        ));
        assert!(!vis.allows(UserId(2), &[RoleId(10)]));
    }

    #[test]
    fn member_overwrite_can_open_a_restricted_channel() {
        let mut vis = restricted_channel();
        vis.overwrites.push(overwrite(
            PermissionOverwriteType::Member(UserId(3)),
            Permissions::VIEW_CHANNEL,
            Permissions::empty(),
        ));
        assert!(vis.allows(UserId(3), &[]));
    }

    #[test]
    fn open_channel_is_visible_to_everyone() {
        let mut vis = restricted_channel();
        vis.overwrites.clear();
        assert!(vis.allows(UserId(2), &[]));
    }
}
